/*
 * Copyright 2024 ArpNetworking
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Sink logging each snapshot as a JSON document

use super::{Sink, SinkError};
use crate::aggregation::Snapshot;
use async_trait::async_trait;
use tracing::info;

/// Sink emitting snapshots through the process log, useful for local debugging
#[derive(Debug, Clone, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    /// Create a console sink
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Sink for ConsoleSink {
    async fn flush(&self, snapshot: &Snapshot) -> Result<(), SinkError> {
        if snapshot.is_empty() {
            return Ok(());
        }

        let json = snapshot.to_json()?;
        info!(
            events_seen = snapshot.events_seen,
            snapshot = %json,
            "window aggregated"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "console"
    }
}

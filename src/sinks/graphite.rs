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

//! Graphite plaintext protocol sink
//!
//! Every aggregate becomes one `<path> <value> <timestamp>\n` line, with paths
//! of the form `<namespace>.<category>.<name>`. The whole window is written
//! over a single TCP connection which is closed afterwards.

use super::{Sink, SinkError};
use crate::aggregation::Snapshot;
use async_trait::async_trait;
use std::fmt::{self, Write as _};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

/// Sink writing snapshots to a Graphite carbon endpoint
#[derive(Debug, Clone)]
pub struct GraphiteSink {
    address: String,
    namespace: String,
}

impl GraphiteSink {
    /// Create a sink for the given `host:port` endpoint and root namespace
    pub fn new(address: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            namespace: namespace.into(),
        }
    }

    /// Render a snapshot in the plaintext protocol, stamped with its window end
    pub fn format(&self, snapshot: &Snapshot) -> String {
        let timestamp = snapshot.window_end.timestamp();
        let namespace = &self.namespace;
        let mut buffer = String::new();

        for (name, value) in &snapshot.counters {
            push_line(
                &mut buffer,
                format_args!("{}.counters.{}", namespace, name),
                *value,
                timestamp,
            );
        }
        for (name, value) in &snapshot.gauges {
            push_line(
                &mut buffer,
                format_args!("{}.gauges.{}", namespace, name),
                *value,
                timestamp,
            );
        }
        for (name, cardinality) in &snapshot.sets {
            push_line(
                &mut buffer,
                format_args!("{}.sets.{}.count", namespace, name),
                *cardinality as f64,
                timestamp,
            );
        }
        for (name, value) in snapshot.timer_values() {
            push_line(
                &mut buffer,
                format_args!("{}.timers.{}", namespace, name),
                value,
                timestamp,
            );
        }
        push_line(
            &mut buffer,
            format_args!("{}.seen", namespace),
            snapshot.events_seen as f64,
            timestamp,
        );

        buffer
    }
}

fn push_line(buffer: &mut String, path: fmt::Arguments<'_>, value: f64, timestamp: i64) {
    // Writing into a String cannot fail.
    let _ = writeln!(buffer, "{} {} {}", path, value, timestamp);
}

#[async_trait]
impl Sink for GraphiteSink {
    async fn flush(&self, snapshot: &Snapshot) -> Result<(), SinkError> {
        if snapshot.is_empty() {
            return Ok(());
        }

        let payload = self.format(snapshot);
        let mut stream = TcpStream::connect(&self.address)
            .await
            .map_err(|source| SinkError::Connect {
                address: self.address.clone(),
                source,
            })?;

        stream
            .write_all(payload.as_bytes())
            .await
            .map_err(SinkError::Write)?;
        stream.shutdown().await.map_err(SinkError::Write)?;

        debug!(
            address = %self.address,
            bytes = payload.len(),
            "pushed metrics to graphite"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "graphite"
    }
}

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

//! Metric sinks for delivering window snapshots to downstream systems
//!
//! Sinks receive an immutable [`Snapshot`] once per purge cycle and forward
//! it to external systems for storage. Every registered sink sees the same
//! snapshot; one sink failing never prevents the others from being tried.

use crate::aggregation::Snapshot;
use crate::config::SinkConfig;
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub mod console;
pub mod graphite;

pub use console::ConsoleSink;
pub use graphite::GraphiteSink;

/// Failure to deliver a snapshot
#[derive(Debug, Error)]
pub enum SinkError {
    /// The downstream endpoint could not be reached
    #[error("failed to connect to {address}")]
    Connect {
        /// Configured endpoint
        address: String,
        /// Underlying transport error
        #[source]
        source: io::Error,
    },

    /// The payload could not be written
    #[error("failed to write metrics")]
    Write(#[source] io::Error),

    /// Delivery did not finish within the flush timeout
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    /// The snapshot could not be encoded
    #[error("failed to serialize snapshot")]
    Serialize(#[from] serde_json::Error),
}

/// Trait for all metric sinks
#[async_trait]
pub trait Sink: Send + Sync {
    /// Deliver one window's snapshot.
    ///
    /// Implementations skip delivery when the snapshot saw no events.
    async fn flush(&self, snapshot: &Snapshot) -> Result<(), SinkError>;

    /// Get the name of this sink
    fn name(&self) -> &str;
}

/// Build the sinks described by the configuration
pub fn from_config(configs: &[SinkConfig]) -> Vec<Box<dyn Sink>> {
    configs
        .iter()
        .map(|config| -> Box<dyn Sink> {
            match config {
                SinkConfig::Graphite { address, namespace } => {
                    Box::new(GraphiteSink::new(address.clone(), namespace.clone()))
                }
                SinkConfig::Console => Box::new(ConsoleSink::new()),
            }
        })
        .collect()
}

/// Hand `snapshot` to every sink in order, bounding each delivery by
/// `timeout`.
///
/// Failures are logged and counted; they never stop the remaining sinks.
pub async fn dispatch(sinks: &[Box<dyn Sink>], snapshot: &Snapshot, timeout: Duration) -> usize {
    let mut failures = 0;

    for sink in sinks {
        let result = match tokio::time::timeout(timeout, sink.flush(snapshot)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout(timeout)),
        };

        match result {
            Ok(()) => debug!(sink = sink.name(), "snapshot delivered"),
            Err(error) => {
                failures += 1;
                warn!(
                    sink = sink.name(),
                    error = &error as &dyn std::error::Error,
                    "failed to deliver snapshot"
                );
            }
        }
    }

    failures
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::aggregation::AggregateCache;
    use crate::model::{Metric, MetricKind};
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Sink recording every snapshot it is handed
    #[derive(Default, Clone)]
    pub(crate) struct RecordingSink {
        pub(crate) snapshots: Arc<Mutex<Vec<Snapshot>>>,
    }

    #[async_trait]
    impl Sink for RecordingSink {
        async fn flush(&self, snapshot: &Snapshot) -> Result<(), SinkError> {
            self.snapshots.lock().push(snapshot.clone());
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    struct FailingSink;

    #[async_trait]
    impl Sink for FailingSink {
        async fn flush(&self, _snapshot: &Snapshot) -> Result<(), SinkError> {
            Err(SinkError::Write(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "downstream closed",
            )))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    struct StalledSink;

    #[async_trait]
    impl Sink for StalledSink {
        async fn flush(&self, _snapshot: &Snapshot) -> Result<(), SinkError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }

        fn name(&self) -> &str {
            "stalled"
        }
    }

    fn snapshot() -> Snapshot {
        let mut cache = AggregateCache::new();
        cache.add(&Metric::new("hits", 1.0, MetricKind::Counter));
        cache.reduce()
    }

    #[tokio::test]
    async fn test_failure_does_not_skip_other_sinks() {
        let recording = RecordingSink::default();
        let sinks: Vec<Box<dyn Sink>> = vec![Box::new(FailingSink), Box::new(recording.clone())];

        let failures = dispatch(&sinks, &snapshot(), Duration::from_secs(1)).await;

        assert_eq!(failures, 1);
        assert_eq!(recording.snapshots.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_sink_times_out() {
        let recording = RecordingSink::default();
        let sinks: Vec<Box<dyn Sink>> = vec![Box::new(StalledSink), Box::new(recording.clone())];

        let failures = dispatch(&sinks, &snapshot(), Duration::from_millis(100)).await;

        assert_eq!(failures, 1);
        assert_eq!(recording.snapshots.lock().len(), 1);
    }

    #[test]
    fn test_from_config() {
        let sinks = from_config(&[
            SinkConfig::Graphite {
                address: "localhost:2003".to_string(),
                namespace: "stats".to_string(),
            },
            SinkConfig::Console,
        ]);

        let names: Vec<_> = sinks.iter().map(|sink| sink.name()).collect();
        assert_eq!(names, vec!["graphite", "console"]);
    }
}

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

//! Datagram ingestion
//!
//! The receive loop reads StatsD datagrams from a UDP socket, splits them into
//! lines and feeds every line that parses into the shared aggregate cache.

use crate::aggregation::SharedCache;
use crate::collector::CollectorState;
use crate::protocol;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Outcome of ingesting one datagram
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ingested {
    /// Lines added to the cache
    pub accepted: usize,
    /// Lines discarded because they failed to parse
    pub rejected: usize,
}

/// Parse every line of `datagram` and add the valid ones to `cache`.
///
/// Malformed lines are logged and skipped without affecting their siblings.
pub fn ingest(cache: &SharedCache, datagram: &[u8]) -> Ingested {
    let mut metrics = Vec::new();
    let mut rejected = 0;

    for (line, result) in protocol::parse_all(datagram) {
        match result {
            Ok(metric) => metrics.push(metric),
            Err(error) => {
                rejected += 1;
                debug!(
                    line = %String::from_utf8_lossy(line),
                    error = &error as &dyn std::error::Error,
                    "discarding metric line"
                );
            }
        }
    }

    cache.add_batch(&metrics, rejected as u64);

    Ingested {
        accepted: metrics.len(),
        rejected,
    }
}

/// Receive datagrams until the collector leaves the running state
pub(crate) async fn receive_loop(
    socket: Arc<UdpSocket>,
    cache: Arc<SharedCache>,
    mut state: watch::Receiver<CollectorState>,
    max_packet_size: usize,
) {
    let mut buffer = vec![0u8; max_packet_size];

    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() || *state.borrow() != CollectorState::Running {
                    break;
                }
            }
            received = socket.recv_from(&mut buffer) => match received {
                Ok((len, peer)) => {
                    let ingested = ingest(&cache, &buffer[..len]);
                    if ingested.rejected > 0 {
                        debug!(%peer, rejected = ingested.rejected, "datagram contained invalid lines");
                    }
                }
                Err(error) => {
                    warn!(error = &error as &dyn std::error::Error, "failed to receive datagram");
                }
            }
        }
    }

    info!("receive loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_metric() {
        let cache = SharedCache::new();
        let ingested = ingest(&cache, b"hits:1|c");

        assert_eq!(ingested, Ingested { accepted: 1, rejected: 0 });
        assert_eq!(cache.peek().counters["hits"], 1.0);
    }

    #[test]
    fn test_batched_datagram() {
        let cache = SharedCache::new();
        let ingested = ingest(&cache, b"hits:1|c\nlatency:20|ms");

        assert_eq!(ingested, Ingested { accepted: 2, rejected: 0 });
        let snapshot = cache.peek();
        assert_eq!(snapshot.events_seen, 2);
        assert_eq!(snapshot.timers["latency"].count, 1.0);
    }

    #[test]
    fn test_malformed_sibling_skipped() {
        let cache = SharedCache::new();
        let ingested = ingest(&cache, b"hits:1|c\nhits:oops|c");

        assert_eq!(ingested, Ingested { accepted: 1, rejected: 1 });
        let snapshot = cache.peek();
        assert_eq!(snapshot.events_seen, 1);
        assert_eq!(snapshot.rejected, 1);
    }

    #[test]
    fn test_empty_lines_ignored() {
        let cache = SharedCache::new();
        let ingested = ingest(&cache, b"\nusers:3|s\r\n\n");

        assert_eq!(ingested, Ingested { accepted: 1, rejected: 0 });
        assert_eq!(cache.peek().sets["users"], 1);
    }

    #[test]
    fn test_first_set_sample_kept() {
        let cache = SharedCache::new();
        ingest(&cache, b"users:42|s");

        assert_eq!(cache.peek().sets["users"], 1);
    }
}

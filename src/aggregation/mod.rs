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

//! Window-based metrics aggregation
//!
//! [`AggregateCache`] accumulates metric events for the current window and
//! reduces them into an immutable [`Snapshot`]. [`SharedCache`] is the single
//! exclusion domain through which the receive path and the purge path touch
//! the cache: every batch of adds holds the lock once, and a purge runs
//! reduce and reset under one acquisition, so each add lands in exactly one
//! window.

use crate::model::{Metric, MetricKind};
use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod stats;

pub use stats::TimerStats;

/// Mutable aggregation state for one window
#[derive(Debug)]
pub struct AggregateCache {
    counters: HashMap<String, f64>,
    gauges: HashMap<String, f64>,
    timers: HashMap<String, Vec<f64>>,
    sets: HashMap<String, HashSet<i64>>,
    events_seen: u64,
    rejected: u64,
    window_start: DateTime<Utc>,
}

impl AggregateCache {
    /// Create an empty cache whose window starts now
    pub fn new() -> Self {
        Self {
            counters: HashMap::new(),
            gauges: HashMap::new(),
            timers: HashMap::new(),
            sets: HashMap::new(),
            events_seen: 0,
            rejected: 0,
            window_start: Utc::now(),
        }
    }

    /// Accumulate a metric event into the current window
    pub fn add(&mut self, metric: &Metric<'_>) {
        self.events_seen += 1;

        // Keys are allocated only when a name is first seen in the window.
        match metric.kind {
            MetricKind::Counter => {
                let delta = metric.counter_delta();
                match self.counters.get_mut(metric.name) {
                    Some(sum) => *sum += delta,
                    None => {
                        self.counters.insert(metric.name.to_owned(), delta);
                    }
                }
            }
            MetricKind::Gauge => match self.gauges.get_mut(metric.name) {
                Some(value) => *value = metric.value,
                None => {
                    self.gauges.insert(metric.name.to_owned(), metric.value);
                }
            },
            MetricKind::Timer => match self.timers.get_mut(metric.name) {
                Some(samples) => samples.push(metric.value),
                None => {
                    self.timers.insert(metric.name.to_owned(), vec![metric.value]);
                }
            },
            MetricKind::Set => {
                let member = metric.value.round() as i64;
                match self.sets.get_mut(metric.name) {
                    Some(members) => {
                        members.insert(member);
                    }
                    None => {
                        let mut members = HashSet::new();
                        members.insert(member);
                        self.sets.insert(metric.name.to_owned(), members);
                    }
                }
            }
        }
    }

    /// Count protocol lines that were discarded in this window
    pub fn record_rejected(&mut self, lines: u64) {
        self.rejected += lines;
    }

    /// Number of events accepted since the last reset
    pub fn events_seen(&self) -> u64 {
        self.events_seen
    }

    /// Whether no event has been accepted since the last reset
    pub fn is_empty(&self) -> bool {
        self.events_seen == 0
    }

    /// Reduce the current window into an immutable snapshot.
    ///
    /// The cache itself is left untouched.
    pub fn reduce(&self) -> Snapshot {
        let timers = self
            .timers
            .iter()
            .filter_map(|(name, samples)| {
                TimerStats::from_samples(samples).map(|stats| (name.clone(), stats))
            })
            .collect();

        Snapshot {
            window_start: self.window_start,
            window_end: Utc::now(),
            counters: clone_sorted(&self.counters),
            gauges: clone_sorted(&self.gauges),
            sets: self
                .sets
                .iter()
                .map(|(name, members)| (name.clone(), members.len() as u64))
                .collect(),
            timers,
            events_seen: self.events_seen,
            rejected: self.rejected,
        }
    }

    /// Empty every mapping and start a new window
    pub fn reset(&mut self) {
        self.counters.clear();
        self.gauges.clear();
        self.timers.clear();
        self.sets.clear();
        self.events_seen = 0;
        self.rejected = 0;
        self.window_start = Utc::now();
    }
}

impl Default for AggregateCache {
    fn default() -> Self {
        Self::new()
    }
}

fn clone_sorted(map: &HashMap<String, f64>) -> BTreeMap<String, f64> {
    map.iter().map(|(name, value)| (name.clone(), *value)).collect()
}

/// Immutable, point-in-time copy of one window's aggregates handed to sinks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Start of the aggregation window
    pub window_start: DateTime<Utc>,

    /// Time the window was reduced
    pub window_end: DateTime<Utc>,

    /// Sample-rate corrected sums by counter name
    pub counters: BTreeMap<String, f64>,

    /// Last written value by gauge name
    pub gauges: BTreeMap<String, f64>,

    /// Distinct member count by set name
    pub sets: BTreeMap<String, u64>,

    /// Derived statistics by timer name; timers without samples are absent
    pub timers: BTreeMap<String, TimerStats>,

    /// Events accepted in the window
    pub events_seen: u64,

    /// Protocol lines discarded in the window
    #[serde(default)]
    pub rejected: u64,
}

impl Snapshot {
    /// Whether the window saw no accepted events
    pub fn is_empty(&self) -> bool {
        self.events_seen == 0
    }

    /// Timer statistics flattened to `<name>.<stat>` keys
    pub fn timer_values(&self) -> impl Iterator<Item = (String, f64)> + '_ {
        self.timers.iter().flat_map(|(name, stats)| {
            stats
                .fields()
                .into_iter()
                .map(move |(suffix, value)| (format!("{}.{}", name, suffix), value))
        })
    }

    /// Serialize the snapshot as a JSON document
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Aggregate cache shared between the receive loop and the purge loop
#[derive(Debug, Default)]
pub struct SharedCache {
    inner: Mutex<AggregateCache>,
}

impl SharedCache {
    /// Create an empty shared cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single metric event
    pub fn add(&self, metric: &Metric<'_>) {
        self.inner.lock().add(metric);
    }

    /// Add the accepted metrics of one datagram and account for its rejected
    /// lines, under a single lock acquisition
    pub fn add_batch(&self, metrics: &[Metric<'_>], rejected: u64) {
        let mut cache = self.inner.lock();
        for metric in metrics {
            cache.add(metric);
        }
        cache.record_rejected(rejected);
    }

    /// Reduce the current window and reset the cache atomically.
    ///
    /// No concurrent add can fall between the reduce and the reset.
    pub fn purge(&self) -> Snapshot {
        let mut cache = self.inner.lock();
        let snapshot = cache.reduce();
        cache.reset();
        snapshot
    }

    /// Reduce the current window without resetting it
    pub fn peek(&self) -> Snapshot {
        self.inner.lock().reduce()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_counter_accumulation() {
        let mut cache = AggregateCache::new();
        for _ in 0..100 {
            cache.add(&Metric::new("test", 1.0, MetricKind::Counter));
        }

        let snapshot = cache.reduce();
        assert_eq!(snapshot.counters["test"], 100.0);
        assert_eq!(snapshot.events_seen, 100);
    }

    #[test]
    fn test_counter_sample_rate() {
        let mut cache = AggregateCache::new();
        cache.add(&Metric::new("hits", 10.0, MetricKind::Counter).with_sample_rate(0.1));
        cache.add(&Metric::new("hits", 4.0, MetricKind::Counter).with_sample_rate(0.0));

        assert_eq!(cache.reduce().counters["hits"], 5.0);
    }

    #[test]
    fn test_gauge_last_write_wins() {
        let mut cache = AggregateCache::new();
        for value in [1.0, 2.0, 3.0] {
            cache.add(&Metric::new("g", value, MetricKind::Gauge));
        }

        let snapshot = cache.reduce();
        assert_eq!(snapshot.gauges["g"], 3.0);
        assert_eq!(snapshot.events_seen, 3);
    }

    #[test]
    fn test_set_cardinality() {
        let mut cache = AggregateCache::new();
        for value in [1.0, 1.0, 2.0] {
            cache.add(&Metric::new("s", value, MetricKind::Set));
        }

        assert_eq!(cache.reduce().sets["s"], 2);
    }

    #[test]
    fn test_set_members_rounded() {
        let mut cache = AggregateCache::new();
        for value in [1.2, 0.8, 1.5, 2.4] {
            cache.add(&Metric::new("s", value, MetricKind::Set));
        }

        // 1.2, 0.8 -> 1; 1.5, 2.4 -> 2
        assert_eq!(cache.reduce().sets["s"], 2);
    }

    #[test]
    fn test_timer_stats() {
        let mut cache = AggregateCache::new();
        for value in 1..=5 {
            cache.add(&Metric::new("test", value as f64, MetricKind::Timer));
        }

        let snapshot = cache.reduce();
        let values: BTreeMap<_, _> = snapshot.timer_values().collect();
        let expected = [
            ("test.min", 1.0),
            ("test.max", 5.0),
            ("test.count", 5.0),
            ("test.average", 3.0),
            ("test.std_dev", 2.0_f64.sqrt()),
            ("test.median", 3.0),
            ("test.upper_95", 5.0),
        ];

        assert_eq!(values.len(), expected.len());
        for (key, value) in expected {
            assert!((values[key] - value).abs() < 1e-8, "{} = {}", key, values[key]);
        }
    }

    #[test]
    fn test_kinds_are_independent() {
        let mut cache = AggregateCache::new();
        cache.add(&Metric::new("shared", 2.0, MetricKind::Counter));
        cache.add(&Metric::new("shared", 5.0, MetricKind::Gauge));

        let snapshot = cache.reduce();
        assert_eq!(snapshot.counters["shared"], 2.0);
        assert_eq!(snapshot.gauges["shared"], 5.0);
    }

    #[test]
    fn test_reduce_does_not_mutate() {
        let mut cache = AggregateCache::new();
        cache.add(&Metric::new("t", 2.0, MetricKind::Timer));
        cache.add(&Metric::new("t", 1.0, MetricKind::Timer));

        let first = cache.reduce();
        let second = cache.reduce();
        assert_eq!(first.timers, second.timers);
        assert_eq!(cache.events_seen(), 2);
    }

    #[test]
    fn test_cache_reset() {
        let mut cache = AggregateCache::new();
        cache.add(&Metric::new("c", 1.0, MetricKind::Counter));
        cache.add(&Metric::new("g", 1.0, MetricKind::Gauge));
        cache.add(&Metric::new("t", 1.0, MetricKind::Timer));
        cache.add(&Metric::new("s", 1.0, MetricKind::Set));
        cache.record_rejected(3);

        cache.reset();

        assert!(cache.is_empty());
        let snapshot = cache.reduce();
        assert!(snapshot.counters.is_empty());
        assert!(snapshot.gauges.is_empty());
        assert!(snapshot.timers.is_empty());
        assert!(snapshot.sets.is_empty());
        assert_eq!(snapshot.events_seen, 0);
        assert_eq!(snapshot.rejected, 0);

        cache.reset();
        assert!(cache.reduce().is_empty());
    }

    #[test]
    fn test_shared_purge_resets() {
        let cache = SharedCache::new();
        cache.add_batch(
            &[
                Metric::new("a", 1.0, MetricKind::Counter),
                Metric::new("b", 1.0, MetricKind::Timer),
            ],
            1,
        );

        let snapshot = cache.purge();
        assert_eq!(snapshot.events_seen, 2);
        assert_eq!(snapshot.rejected, 1);
        assert!(cache.peek().is_empty());
    }

    #[test]
    fn test_snapshot_json() {
        let mut cache = AggregateCache::new();
        cache.add(&Metric::new("c", 2.0, MetricKind::Counter));
        cache.add(&Metric::new("t", 1.0, MetricKind::Timer));

        let snapshot = cache.reduce();
        let json = snapshot.to_json().unwrap();
        let decoded: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, snapshot);
        assert!(json.contains("\"upper_95\""));
    }

    #[test]
    fn test_no_loss_under_concurrency() {
        const PRODUCERS: usize = 4;
        const EVENTS_PER_PRODUCER: usize = 25_000;

        let cache = Arc::new(SharedCache::new());
        let done = Arc::new(AtomicBool::new(false));

        let purger = {
            let cache = Arc::clone(&cache);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut seen = 0u64;
                let mut counted = 0.0;
                while !done.load(Ordering::Acquire) {
                    let snapshot = cache.purge();
                    seen += snapshot.events_seen;
                    counted += snapshot.counters.get("hits").copied().unwrap_or(0.0);
                    thread::sleep(Duration::from_micros(200));
                }
                let snapshot = cache.purge();
                seen += snapshot.events_seen;
                counted += snapshot.counters.get("hits").copied().unwrap_or(0.0);
                (seen, counted)
            })
        };

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for _ in 0..EVENTS_PER_PRODUCER {
                        cache.add(&Metric::new("hits", 1.0, MetricKind::Counter));
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }
        done.store(true, Ordering::Release);

        let (seen, counted) = purger.join().unwrap();
        let total = (PRODUCERS * EVENTS_PER_PRODUCER) as u64;
        assert_eq!(seen, total);
        assert_eq!(counted, total as f64);
    }
}

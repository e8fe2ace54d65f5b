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

//! Core data model for inbound metric events
//!
//! A [`Metric`] is the typed form of one protocol line. It lives only as long
//! as the datagram it was parsed from and is consumed by the aggregate cache.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of metric, determining how samples are aggregated within a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Additive value, summed per window
    Counter,
    /// Point-in-time value, last write wins
    Gauge,
    /// Duration or magnitude sample, reduced to distribution statistics
    Timer,
    /// Membership sample, reduced to distinct-member cardinality
    Set,
}

impl MetricKind {
    /// Maps a protocol type code to a metric kind
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "c" => Some(Self::Counter),
            "g" => Some(Self::Gauge),
            "ms" => Some(Self::Timer),
            "s" => Some(Self::Set),
            _ => None,
        }
    }

    /// Protocol type code for this kind
    pub fn code(self) -> &'static str {
        match self {
            Self::Counter => "c",
            Self::Gauge => "g",
            Self::Timer => "ms",
            Self::Set => "s",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A single metric event, borrowed from the datagram it was parsed from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metric<'a> {
    /// Dotted metric name, used verbatim as the aggregate key
    pub name: &'a str,

    /// Sample value, already negated for non-counter kinds with a `-` sign
    pub value: f64,

    /// Kind of metric
    pub kind: MetricKind,

    /// Client-side sample rate; `1.0` when the line carries none
    pub sample_rate: f64,
}

impl<'a> Metric<'a> {
    /// Create a metric with the default sample rate
    pub fn new(name: &'a str, value: f64, kind: MetricKind) -> Self {
        Self {
            name,
            value,
            kind,
            sample_rate: 1.0,
        }
    }

    /// Set the sample rate
    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Value this metric contributes to a counter
    ///
    /// A non-positive rate leaves the value unscaled.
    pub fn counter_delta(&self) -> f64 {
        if self.sample_rate > 0.0 {
            self.value * self.sample_rate
        } else {
            self.value
        }
    }
}

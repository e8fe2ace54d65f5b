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

//! Collector configuration
//!
//! Configuration is read from a JSON document with camelCase keys. Every field
//! has a default, so an empty object is a valid configuration. Durations use
//! the ISO-8601 `PT<seconds>S` form.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main collector configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorConfig {
    /// Host the datagram listener binds to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the datagram listener binds to
    #[serde(default = "default_port")]
    pub port: u16,

    /// Length of an aggregation window
    #[serde(default = "default_purge_interval", with = "duration_serde")]
    pub purge_interval: Duration,

    /// Upper bound for a single sink delivery; shorter than the purge interval
    #[serde(default = "default_flush_timeout", with = "duration_serde")]
    pub flush_timeout: Duration,

    /// Upper bound for the in-flight and final purge while stopping
    #[serde(default = "default_shutdown_grace_period", with = "duration_serde")]
    pub shutdown_grace_period: Duration,

    /// Purge the partial window once more when stopping
    #[serde(default = "default_true")]
    pub flush_on_shutdown: bool,

    /// Receive buffer size; longer datagrams are truncated
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,

    /// Sinks receiving every window
    #[serde(default = "default_sinks")]
    pub sinks: Vec<SinkConfig>,
}

/// Configuration of a single sink
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SinkConfig {
    /// Graphite plaintext protocol over TCP
    Graphite {
        /// `host:port` of the carbon endpoint
        #[serde(default = "default_graphite_address")]
        address: String,

        /// Root of every emitted metric path
        #[serde(default = "default_namespace")]
        namespace: String,
    },

    /// JSON snapshots written to the process log
    Console,
}

impl CollectorConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_json(&contents)
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse configuration")
    }

    /// Address the datagram listener binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check invariants that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.purge_interval.is_zero() {
            bail!("purgeInterval must be greater than zero");
        }
        if self.flush_timeout >= self.purge_interval {
            bail!(
                "flushTimeout ({:?}) must be shorter than purgeInterval ({:?})",
                self.flush_timeout,
                self.purge_interval
            );
        }
        if self.max_packet_size == 0 {
            bail!("maxPacketSize must be greater than zero");
        }
        Ok(())
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            purge_interval: default_purge_interval(),
            flush_timeout: default_flush_timeout(),
            shutdown_grace_period: default_shutdown_grace_period(),
            flush_on_shutdown: true,
            max_packet_size: default_max_packet_size(),
            sinks: default_sinks(),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8125
}

fn default_purge_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_flush_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_shutdown_grace_period() -> Duration {
    Duration::from_secs(5)
}

fn default_true() -> bool {
    true
}

fn default_max_packet_size() -> usize {
    65_507
}

fn default_graphite_address() -> String {
    "localhost:2003".to_string()
}

fn default_namespace() -> String {
    "statsd".to_string()
}

fn default_sinks() -> Vec<SinkConfig> {
    vec![SinkConfig::Graphite {
        address: default_graphite_address(),
        namespace: default_namespace(),
    }]
}

// Duration serialization helpers
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // ISO-8601 seconds form (PT1.5S)
        serializer.serialize_str(&format!("PT{}S", duration.as_secs_f64()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        let seconds = s
            .strip_prefix("PT")
            .and_then(|rest| rest.strip_suffix('S'))
            .ok_or_else(|| serde::de::Error::custom(format!("Invalid duration format: {}", s)))?;
        let seconds: f64 = seconds.parse().map_err(serde::de::Error::custom)?;

        Duration::try_from_secs_f64(seconds).map_err(serde::de::Error::custom)
    }
}

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

//! # StatsD Aggregator
//!
//! A low-overhead StatsD collection daemon. Instrumented applications send
//! fire-and-forget metric events over UDP; the collector aggregates them in
//! memory over a fixed window and flushes summary statistics to one or more
//! time-series sinks on every purge interval.
//!
//! ## Features
//!
//! - **StatsD Line Protocol**: counters (`c`), gauges (`g`), timers (`ms`) and
//!   sets (`s`), with client-side sample rates and batched datagrams
//! - **Window Aggregation**: counter sums, last-write gauges, set cardinality
//!   and timer statistics (min, max, count, average, std dev, median, p95)
//! - **Multiple Output Sinks**: Graphite plaintext protocol, console
//! - **Graceful Shutdown**: bounded drain of the in-flight window on SIGINT
//!   or SIGTERM
//!
//! ## Example
//!
//! ```rust,no_run
//! use statsd_aggregator::{config::CollectorConfig, sinks, Collector};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = CollectorConfig::from_file("config.json")?;
//!     let sinks = sinks::from_config(&config.sinks);
//!     let mut collector = Collector::bind(config, sinks).await?;
//!     collector.run_until_signal().await?;
//!     Ok(())
//! }
//! ```

use tokio::signal;
use tracing::{info, warn};

pub mod aggregation;
pub mod collector;
pub mod config;
pub mod model;
pub mod protocol;
pub mod sinks;
pub mod sources;

pub use collector::{Collector, CollectorState};

/// Wait for SIGINT, or SIGTERM on unix platforms
pub async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, initiating shutdown"),
            Err(err) => {
                warn!("Failed to listen for SIGINT: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, initiating shutdown");
            }
            Err(err) => {
                warn!("Failed to register SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

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

use anyhow::{Context, Result};
use clap::Parser;
use statsd_aggregator::config::{CollectorConfig, SinkConfig};
use statsd_aggregator::{sinks, Collector};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, Level};

/// StatsD metrics aggregation daemon.
#[derive(Parser)]
#[command(name = "statsd-aggregator", version, about)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to listen on for metric datagrams.
    #[arg(short = 's', long)]
    host: Option<String>,

    /// Port to listen on for metric datagrams.
    #[arg(short, long)]
    port: Option<u16>,

    /// Graphite endpoint (`host:port`); replaces the configured sinks.
    #[arg(short, long)]
    graphite: Option<String>,

    /// Purge interval in seconds.
    #[arg(short = 't', long)]
    purge_interval: Option<u64>,

    /// Logging verbosity (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: Level,
}

impl Cli {
    fn load_config(&self) -> Result<CollectorConfig> {
        let mut config = match &self.config {
            Some(path) => CollectorConfig::from_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => CollectorConfig::default(),
        };

        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(address) = &self.graphite {
            let namespace = config
                .sinks
                .iter()
                .find_map(|sink| match sink {
                    SinkConfig::Graphite { namespace, .. } => Some(namespace.clone()),
                    SinkConfig::Console => None,
                })
                .unwrap_or_else(|| "statsd".to_string());
            config.sinks = vec![SinkConfig::Graphite {
                address: address.clone(),
                namespace,
            }];
        }
        if let Some(seconds) = self.purge_interval {
            config.purge_interval = Duration::from_secs(seconds);
            // Keep sink delivery bounded within the shorter window.
            if config.flush_timeout >= config.purge_interval {
                config.flush_timeout = config.purge_interval / 2;
            }
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .init();

    let config = cli.load_config()?;
    info!(
        address = %config.bind_address(),
        purge_interval = ?config.purge_interval,
        "Configuration loaded"
    );

    let sinks = sinks::from_config(&config.sinks);
    let mut collector = Collector::bind(config, sinks).await?;
    info!("Listening for metrics on {}", collector.local_addr());

    collector.run_until_signal().await?;
    info!("Shutdown complete");

    Ok(())
}

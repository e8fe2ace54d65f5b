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

//! Collector lifecycle
//!
//! The [`Collector`] owns the datagram socket, the shared aggregate cache and
//! the registered sinks. While running it drives two tasks: the receive loop
//! (producer) and the purge loop (consumer). Both observe the collector state
//! through a watch channel and stop once it leaves [`CollectorState::Running`].

use crate::aggregation::{SharedCache, Snapshot};
use crate::config::CollectorConfig;
use crate::sinks::{self, Sink};
use crate::sources;
use anyhow::{bail, Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Lifecycle state of a collector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    /// Socket bound, loops not started
    Initialized,
    /// Receive and purge loops active
    Running,
    /// Loops asked to stop; in-flight work is draining
    ShuttingDown,
    /// Terminal; the socket has been released
    Stopped,
}

/// StatsD collector: binds the inbound socket and runs the aggregation loops
pub struct Collector {
    config: CollectorConfig,
    cache: Arc<SharedCache>,
    sinks: Arc<[Box<dyn Sink>]>,
    socket: Option<Arc<UdpSocket>>,
    local_addr: SocketAddr,
    state: watch::Sender<CollectorState>,
    tasks: Option<(JoinHandle<()>, JoinHandle<()>)>,
}

impl Collector {
    /// Validate the configuration and bind the datagram listener.
    ///
    /// Failing to bind is fatal for the daemon and reported with the address.
    pub async fn bind(config: CollectorConfig, sinks: Vec<Box<dyn Sink>>) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let address = config.bind_address();
        let socket = UdpSocket::bind(&address)
            .await
            .with_context(|| format!("Failed to bind datagram listener on {}", address))?;
        let local_addr = socket
            .local_addr()
            .context("Failed to read bound socket address")?;

        let (state, _) = watch::channel(CollectorState::Initialized);

        Ok(Self {
            config,
            cache: Arc::new(SharedCache::new()),
            sinks: Arc::from(sinks),
            socket: Some(Arc::new(socket)),
            local_addr,
            state,
            tasks: None,
        })
    }

    /// Address the datagram listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current lifecycle state
    pub fn state(&self) -> CollectorState {
        *self.state.borrow()
    }

    /// Reduce the current window without ending it
    pub fn peek(&self) -> Snapshot {
        self.cache.peek()
    }

    /// Start the receive and purge loops
    pub fn start(&mut self) -> Result<()> {
        let state = self.state();
        if state != CollectorState::Initialized {
            bail!("Collector cannot start from state {:?}", state);
        }
        let socket = self
            .socket
            .clone()
            .context("Collector socket already released")?;

        self.state.send_replace(CollectorState::Running);

        let receiver = tokio::spawn(sources::receive_loop(
            socket,
            Arc::clone(&self.cache),
            self.state.subscribe(),
            self.config.max_packet_size,
        ));
        let purger = tokio::spawn(purge_loop(
            Arc::clone(&self.cache),
            Arc::clone(&self.sinks),
            self.state.subscribe(),
            self.config.purge_interval,
            self.config.flush_timeout,
        ));
        self.tasks = Some((receiver, purger));

        info!(
            address = %self.local_addr,
            purge_interval = ?self.config.purge_interval,
            sinks = ?self.sinks.iter().map(|sink| sink.name()).collect::<Vec<_>>(),
            "collector running"
        );
        Ok(())
    }

    /// Stop both loops, optionally purge the partial window, and release the
    /// socket.
    ///
    /// An in-flight purge is given the shutdown grace period before it is
    /// abandoned.
    pub async fn shutdown(&mut self) -> Result<()> {
        match self.state() {
            CollectorState::Running => {}
            CollectorState::Initialized => {
                self.socket = None;
                self.state.send_replace(CollectorState::Stopped);
                return Ok(());
            }
            state => bail!("Collector cannot shut down from state {:?}", state),
        }

        info!("collector shutting down");
        self.state.send_replace(CollectorState::ShuttingDown);
        let grace = self.config.shutdown_grace_period;

        if let Some((receiver, mut purger)) = self.tasks.take() {
            if let Err(error) = receiver.await {
                warn!(error = &error as &dyn std::error::Error, "receive loop failed");
            }
            match tokio::time::timeout(grace, &mut purger).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    warn!(error = &error as &dyn std::error::Error, "purge loop failed");
                }
                Err(_) => {
                    warn!(?grace, "abandoning in-flight purge");
                    purger.abort();
                }
            }
        }

        if self.config.flush_on_shutdown {
            let final_purge = purge(&self.cache, &self.sinks, self.config.flush_timeout);
            if tokio::time::timeout(grace, final_purge).await.is_err() {
                warn!(?grace, "abandoning final purge");
            }
        }

        self.socket = None;
        self.state.send_replace(CollectorState::Stopped);
        info!("collector stopped");
        Ok(())
    }

    /// Run until SIGINT or SIGTERM, then shut down gracefully
    pub async fn run_until_signal(&mut self) -> Result<()> {
        self.start()?;
        crate::shutdown_signal().await;
        self.shutdown().await
    }
}

/// End the current window and hand its snapshot to every sink.
///
/// The cache is reset before delivery starts, so the window advances no
/// matter how the sinks fare.
pub async fn purge(cache: &SharedCache, sinks: &[Box<dyn Sink>], flush_timeout: Duration) {
    let snapshot = cache.purge();
    debug!(
        events_seen = snapshot.events_seen,
        rejected = snapshot.rejected,
        timers = snapshot.timers.len(),
        "purging window"
    );

    sinks::dispatch(sinks, &snapshot, flush_timeout).await;
}

async fn purge_loop(
    cache: Arc<SharedCache>,
    sinks: Arc<[Box<dyn Sink>]>,
    mut state: watch::Receiver<CollectorState>,
    interval: Duration,
    flush_timeout: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() || *state.borrow() != CollectorState::Running {
                    break;
                }
            }
            _ = ticker.tick() => purge(&cache, &sinks, flush_timeout).await,
        }
    }

    info!("purge loop stopped");
}

//! Streaming server
//!
//! Two loops share one [`SessionManager`]:
//!
//! - the accept loop turns incoming connections (optionally TLS) into
//!   client sessions
//! - the dispatch loop runs every `tick_interval`, takes one snapshot per
//!   streamed channel and queues a filtered TDATA update for each
//!   subscribed session
//!
//! Dispatch never writes to a socket itself; it only enqueues, so a slow
//! client can neither block the loop nor acquisition.
//!
//! # Examples
//!
//! ```no_run
//! use igtl_tracking_server::config::DeviceSet;
//! use igtl_tracking_server::io::TrackingServer;
//! use igtl_tracking_server::tracking::ToolSourceRegistry;
//! use std::sync::Arc;
//!
//! # async fn example() -> igtl_tracking_server::error::Result<()> {
//! let device_set = Arc::new(DeviceSet::from_file("config/device_set.toml")?);
//! let registry = Arc::new(ToolSourceRegistry::new(&device_set));
//! let server = TrackingServer::bind(device_set, registry).await?;
//!
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! server.run(shutdown_rx).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::DeviceSet;
use crate::error::{Result, TrackingError};
use crate::io::session_manager::{SessionManager, SessionSettings};
use crate::io::tls;
use crate::protocol::message::Message;
use crate::protocol::types::TDataMessage;
use crate::protocol::update::encode_update;
use crate::tracking::{ChannelMultiplexer, ToolSourceRegistry, TransformEngine, TransformResult};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, trace, warn};

/// Round-robin cursor over the streamed channels
///
/// Channels not reached within one tick's budget are visited first on the
/// next tick, so no channel is starved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickScheduler {
    channels: usize,
    cursor: usize,
    /// Set from the first deferral until a tick completes
    deferring: bool,
}

impl TickScheduler {
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            cursor: 0,
            deferring: false,
        }
    }

    /// Channel indices in visiting order for the next tick
    pub fn order(&self) -> Vec<usize> {
        (self.cursor..self.channels).chain(0..self.cursor).collect()
    }

    /// First channel to visit next tick
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Record that the tick stopped before channel `next`
    ///
    /// Returns `true` only for the first deferral since the last complete tick.
    pub fn defer_from(&mut self, next: usize) -> bool {
        self.cursor = if self.channels == 0 { 0 } else { next % self.channels };
        !std::mem::replace(&mut self.deferring, true)
    }

    /// Record that every channel was visited
    pub fn complete(&mut self) {
        self.cursor = 0;
        self.deferring = false;
    }
}

/// Outcome of one dispatch tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Channels snapshotted this tick
    pub channels_visited: usize,
    /// Channels pushed to the next tick
    pub channels_deferred: usize,
    /// Updates accepted into client queues
    pub messages_queued: usize,
    /// Updates dropped on full client queues
    pub messages_dropped: usize,
}

/// OpenIGTLink tracking data server
pub struct TrackingServer {
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    local_addr: SocketAddr,
    device_set: Arc<DeviceSet>,
    multiplexer: ChannelMultiplexer,
    channel_ids: Vec<String>,
    sessions: Arc<SessionManager>,
}

impl TrackingServer {
    /// Bind `0.0.0.0:listening_port`
    ///
    /// # Errors
    ///
    /// - [`TrackingError::TransportFatal`] - The port could not be bound
    /// - [`TrackingError::Io`] - TLS certificate or key could not be loaded
    pub async fn bind(device_set: Arc<DeviceSet>, registry: Arc<ToolSourceRegistry>) -> Result<Self> {
        let addr = format!("0.0.0.0:{}", device_set.server.listening_port);
        Self::bind_addr(device_set, registry, &addr).await
    }

    /// Bind an explicit address, e.g. `127.0.0.1:0` in tests
    pub async fn bind_addr(device_set: Arc<DeviceSet>, registry: Arc<ToolSourceRegistry>, addr: &str) -> Result<Self> {
        let acceptor = device_set.server.tls.as_ref().map(tls::acceptor).transpose()?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(TrackingError::TransportFatal)?;
        let local_addr = listener.local_addr().map_err(TrackingError::TransportFatal)?;

        let engine = Arc::new(TransformEngine::new(device_set.clone(), registry));
        let multiplexer = ChannelMultiplexer::new(engine);
        let channel_ids = multiplexer.channel_ids();
        let sessions = SessionManager::new(SessionSettings::from_device_set(&device_set));

        info!(
            local_addr = %local_addr,
            device = %device_set.device.id,
            channels = ?channel_ids,
            tls = acceptor.is_some(),
            "Tracking server listening"
        );

        Ok(TrackingServer {
            listener,
            acceptor,
            local_addr,
            device_set,
            multiplexer,
            channel_ids,
            sessions,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Serve until `shutdown` becomes `true`
    ///
    /// Every session is drained before this returns, also on error.
    ///
    /// # Errors
    ///
    /// [`TrackingError::TransportFatal`] if accepting connections fails.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let delay = self.device_set.device.startup_delay;
        if !delay.is_zero() {
            info!(delay_ms = delay.as_millis() as u64, "Waiting for device startup");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_for_shutdown(&mut shutdown) => return Ok(()),
            }
        }

        let result = tokio::select! {
            result = self.accept_loop() => result,
            _ = self.dispatch_loop() => Ok(()),
            _ = wait_for_shutdown(&mut shutdown) => {
                info!("Shutdown requested");
                Ok(())
            }
        };

        if let Err(e) = &result {
            warn!(error = %e, "Server stopping");
        }
        self.sessions.shutdown().await;
        info!("Tracking server stopped");
        result
    }

    async fn accept_loop(&self) -> Result<()> {
        // Pending TLS handshakes are aborted when this future is dropped
        let mut handshakes = JoinSet::new();

        loop {
            let (stream, peer) = self
                .listener
                .accept()
                .await
                .map_err(TrackingError::TransportFatal)?;
            if let Err(e) = stream.set_nodelay(true) {
                debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
            }

            while handshakes.try_join_next().is_some() {}

            match &self.acceptor {
                None => {
                    self.sessions.accept(stream, peer).await;
                }
                Some(acceptor) => {
                    let acceptor = acceptor.clone();
                    let sessions = self.sessions.clone();
                    let timeout = self.device_set.server.send_timeout;
                    handshakes.spawn(async move {
                        match tokio::time::timeout(timeout, acceptor.accept(stream)).await {
                            Ok(Ok(tls_stream)) => {
                                sessions.accept(tls_stream, peer).await;
                            }
                            Ok(Err(e)) => warn!(peer = %peer, error = %e, "TLS handshake failed"),
                            Err(_) => warn!(peer = %peer, "TLS handshake timed out"),
                        }
                    });
                }
            }
        }
    }

    async fn dispatch_loop(&self) {
        let mut ticker = tokio::time::interval(self.device_set.server.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut scheduler = TickScheduler::new(self.channel_ids.len());

        loop {
            ticker.tick().await;
            self.dispatch_tick(&mut scheduler).await;
        }
    }

    /// Run one dispatch tick
    ///
    /// Visits channels in scheduler order until the processing budget runs
    /// out. At least one channel is visited per tick. Keep-alives and stall
    /// detection run after the channels.
    pub async fn dispatch_tick(&self, scheduler: &mut TickScheduler) -> TickReport {
        let settings = &self.device_set.server;
        let started = Instant::now();
        let order = scheduler.order();
        let mut report = TickReport::default();

        for (position, &channel) in order.iter().enumerate() {
            if position > 0 && started.elapsed() >= settings.max_processing_time {
                report.channels_deferred = order.len() - position;
                let next_channel = &self.channel_ids[channel];
                if scheduler.defer_from(channel) {
                    warn!(
                        deferred = report.channels_deferred,
                        next_channel = %next_channel,
                        budget_ms = settings.max_processing_time.as_millis() as u64,
                        "Tick budget exhausted, deferring channels"
                    );
                } else {
                    debug!(
                        deferred = report.channels_deferred,
                        next_channel = %next_channel,
                        "Tick budget still exhausted"
                    );
                }
                break;
            }

            let (queued, dropped) = self.dispatch_channel(&self.channel_ids[channel]).await;
            report.channels_visited += 1;
            report.messages_queued += queued;
            report.messages_dropped += dropped;
            tokio::task::yield_now().await;
        }
        if report.channels_deferred == 0 {
            scheduler.complete();
        }

        let now = Instant::now();
        if let Some(interval) = settings.keep_alive_interval {
            self.sessions.send_keep_alives(interval, now).await;
        }
        self.sessions.detect_stalled(now).await;

        trace!(
            visited = report.channels_visited,
            queued = report.messages_queued,
            elapsed_us = started.elapsed().as_micros() as u64,
            "Dispatch tick"
        );
        report
    }

    /// Queue one channel snapshot to every subscribed session
    async fn dispatch_channel(&self, channel_id: &str) -> (usize, usize) {
        let snapshot = match self.multiplexer.snapshot(channel_id) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(channel = channel_id, error = %e, "Snapshot failed");
                return (0, 0);
            }
        };
        let valid_only = self.device_set.server.send_valid_transforms_only;
        let mut full_update: Option<Bytes> = None;
        let (mut queued, mut dropped) = (0, 0);

        for session in self.sessions.sessions().await {
            let profile = session.subscription();
            if !profile.accepts_type(TDataMessage::message_type()) {
                continue;
            }

            let selected: Vec<TransformResult> = snapshot
                .iter()
                .filter(|r| profile.wants(&r.name) && (r.valid || !valid_only))
                .cloned()
                .collect();
            if selected.is_empty() {
                continue;
            }

            let frame = if selected.len() == snapshot.len() {
                // Sessions that take the whole snapshot share one encoding
                if full_update.is_none() {
                    full_update = encode_frame(channel_id, &selected);
                }
                match &full_update {
                    Some(frame) => frame.clone(),
                    None => continue,
                }
            } else {
                match encode_frame(channel_id, &selected) {
                    Some(frame) => frame,
                    None => continue,
                }
            };

            if session.enqueue(frame) {
                queued += 1;
            } else {
                dropped += 1;
            }
        }

        if dropped > 0 {
            warn!(channel = channel_id, dropped, "Updates dropped on full client queues");
        }
        (queued, dropped)
    }
}

fn encode_frame(channel_id: &str, results: &[TransformResult]) -> Option<Bytes> {
    match encode_update(channel_id, results).and_then(|msg| msg.encode()) {
        Ok(bytes) => Some(Bytes::from(bytes)),
        Err(e) => {
            warn!(channel = channel_id, error = %e, "Failed to encode update");
            None
        }
    }
}

/// Resolves once `shutdown` is `true` or its sender is gone
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

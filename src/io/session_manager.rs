//! Client session management
//!
//! Every accepted connection becomes a [`ClientSession`] with two tasks:
//!
//! - a writer task that owns the write half and delivers queued frames one
//!   at a time through the [`PendingMessage`] state machine
//! - a reader task that parses requests (subscriptions and queries)
//!
//! The dispatch loop only ever calls [`ClientSession::enqueue`], which never
//! blocks: a full queue drops the frame and counts it. A session leaves the
//! registry exactly once, through [`SessionManager::disconnect`].

use crate::config::{ClientProfile, DeviceSet};
use crate::error::{Result, TrackingError};
use crate::io::delivery::PendingMessage;
use crate::io::retry::RetryPolicy;
use crate::protocol::header::Header;
use crate::protocol::message::{IgtlMessage, Message};
use crate::protocol::request::ClientRequest;
use crate::protocol::types::{CapabilityMessage, StatusMessage};
use crate::protocol::{MAX_REQUEST_BODY_SIZE, SERVER_CAPABILITIES, STREAMED_MESSAGE_TYPES};
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Unique identifier for each client session
pub type ClientId = u64;

/// Why a session was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ClosedByPeer,
    ReadFailed,
    ProtocolError,
    DeliveryFailed,
    Stalled,
    Shutdown,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            DisconnectReason::ClosedByPeer => "closed by peer",
            DisconnectReason::ReadFailed => "read failed",
            DisconnectReason::ProtocolError => "protocol error",
            DisconnectReason::DeliveryFailed => "delivery failed",
            DisconnectReason::Stalled => "stalled",
            DisconnectReason::Shutdown => "server shutdown",
        };
        f.write_str(text)
    }
}

/// Session parameters derived from the `[server]` section
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub queue_capacity: usize,
    pub retry: RetryPolicy,
    pub send_timeout: Duration,
    pub stall_timeout: Duration,
    pub crc_check: bool,
    pub default_profile: ClientProfile,
    /// Device id reported in STATUS replies
    pub device_id: String,
    /// Transform names produced by the served channels
    pub known_transforms: HashSet<String>,
}

impl SessionSettings {
    pub fn from_device_set(device_set: &DeviceSet) -> Self {
        let server = &device_set.server;
        let known_transforms = server
            .channels
            .iter()
            .flat_map(|&c| device_set.channels[c].tools.iter())
            .map(|&t| device_set.tools[t].transform_name())
            .collect();

        Self {
            queue_capacity: server.max_messages_in_flight,
            retry: RetryPolicy::from_settings(server),
            send_timeout: server.send_timeout,
            stall_timeout: server.stall_timeout,
            crc_check: server.crc_check,
            default_profile: server.default_client.clone(),
            device_id: device_set.device.id.clone(),
            known_transforms,
        }
    }
}

enum Outgoing {
    Frame(Bytes),
    /// Disconnect once everything queued before has been written
    Close(DisconnectReason),
}

/// One connected client
///
/// Delivery state is owned by the session's writer task; the counters here
/// are shared with the dispatch loop for reporting and stall detection.
#[derive(Debug)]
pub struct ClientSession {
    id: ClientId,
    peer: SocketAddr,
    connected_at: Instant,
    subscription: StdRwLock<ClientProfile>,
    tx: mpsc::Sender<Outgoing>,
    disconnected: AtomicBool,
    /// Frames queued or being written
    pending: AtomicUsize,
    /// When `pending` last left zero
    pending_since: StdMutex<Instant>,
    last_ack: StdMutex<Instant>,
    last_enqueued: StdMutex<Instant>,
    delivered: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Outgoing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outgoing::Frame(bytes) => write!(f, "Frame({} bytes)", bytes.len()),
            Outgoing::Close(reason) => write!(f, "Close({})", reason),
        }
    }
}

impl ClientSession {
    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn uptime(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::Acquire)
    }

    /// Current subscription
    pub fn subscription(&self) -> ClientProfile {
        self.subscription
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Queue a frame without blocking
    ///
    /// Returns `false` and counts a drop if the queue is full or the session
    /// is closing.
    pub fn enqueue(&self, frame: Bytes) -> bool {
        if !self.is_connected() {
            return false;
        }
        // Count before sending so the writer never sees a frame it cannot account for
        {
            let mut since = lock(&self.pending_since);
            if self.pending.fetch_add(1, Ordering::AcqRel) == 0 {
                *since = Instant::now();
            }
        }
        match self.tx.try_send(Outgoing::Frame(frame)) {
            Ok(()) => {
                *lock(&self.last_enqueued) = Instant::now();
                true
            }
            Err(_) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(client_id = self.id, dropped, "Outbound queue full, frame dropped");
                false
            }
        }
    }

    fn enqueue_message<T: Message>(&self, content: T, device_name: &str) -> Result<bool> {
        let bytes = IgtlMessage::new(content, device_name)?.encode()?;
        Ok(self.enqueue(Bytes::from(bytes)))
    }

    /// Queue a final frame and close once it is written
    fn close_after(&self, frame: Bytes, reason: DisconnectReason) -> bool {
        self.enqueue(frame) && self.tx.try_send(Outgoing::Close(reason)).is_ok()
    }

    fn record_ack(&self) {
        *lock(&self.last_ack) = Instant::now();
        self.pending.fetch_sub(1, Ordering::AcqRel);
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Frames have been outstanding for `window` with no acknowledgement
    ///
    /// Measured from the later of the last acknowledgement and the moment the
    /// queue last became non-empty, so an idle client is not penalised.
    fn is_stalled(&self, now: Instant, window: Duration) -> bool {
        if self.pending.load(Ordering::Acquire) == 0 {
            return false;
        }
        let since = (*lock(&self.last_ack)).max(*lock(&self.pending_since));
        now.saturating_duration_since(since) >= window
    }

    fn idle_since(&self, now: Instant) -> Duration {
        let last = (*lock(&self.last_enqueued)).max(*lock(&self.last_ack));
        now.saturating_duration_since(last)
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Snapshot of a session for reporting
#[derive(Debug, Clone, PartialEq)]
pub struct ClientInfo {
    pub id: ClientId,
    pub peer: SocketAddr,
    pub uptime: Duration,
    pub subscription: ClientProfile,
    pub pending: usize,
    pub delivered: u64,
    pub dropped: u64,
    pub failed: u64,
}

/// Registry of connected clients
pub struct SessionManager {
    sessions: RwLock<HashMap<ClientId, Arc<ClientSession>>>,
    next_client_id: AtomicU64,
    settings: SessionSettings,
}

impl SessionManager {
    pub fn new(settings: SessionSettings) -> Arc<Self> {
        Arc::new(SessionManager {
            sessions: RwLock::new(HashMap::new()),
            next_client_id: AtomicU64::new(1),
            settings,
        })
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Register a connection and start its reader and writer tasks
    ///
    /// The session starts with the default client profile.
    pub async fn accept<S>(self: &Arc<Self>, stream: S, peer: SocketAddr) -> Arc<ClientSession>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.settings.queue_capacity.max(1));
        let now = Instant::now();

        let session = Arc::new(ClientSession {
            id,
            peer,
            connected_at: now,
            subscription: StdRwLock::new(self.settings.default_profile.clone()),
            tx,
            disconnected: AtomicBool::new(false),
            pending: AtomicUsize::new(0),
            pending_since: StdMutex::new(now),
            last_ack: StdMutex::new(now),
            last_enqueued: StdMutex::new(now),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            tasks: StdMutex::new(Vec::new()),
        });

        // Registered before the tasks start so a task-initiated disconnect finds it
        self.sessions.write().await.insert(id, session.clone());

        let (reader, writer) = tokio::io::split(stream);
        let writer_task = tokio::spawn(write_loop(self.clone(), session.clone(), writer, rx));
        let reader_task = tokio::spawn(read_loop(self.clone(), session.clone(), reader));
        {
            let mut tasks = lock(&session.tasks);
            tasks.extend([writer_task, reader_task]);
            // A task may have closed the session before its handles were stored
            if !session.is_connected() {
                tasks.iter().for_each(JoinHandle::abort);
            }
        }

        info!(client_id = id, peer = %peer, "Client connected");
        session
    }

    /// Replace the subscription of a session
    ///
    /// An empty type list keeps the default profile's types; an empty name
    /// list subscribes to every transform. Names no served channel produces
    /// are accepted and logged.
    ///
    /// # Errors
    ///
    /// - [`TrackingError::Protocol`] - A requested message type cannot be streamed
    /// - [`TrackingError::Protocol`] - No session with this id
    pub async fn subscribe(&self, id: ClientId, message_types: Vec<String>, transform_names: Vec<String>) -> Result<()> {
        let session = self
            .session(id)
            .await
            .ok_or_else(|| TrackingError::Protocol(format!("unknown client {}", id)))?;
        self.apply_subscription(&session, message_types, transform_names)
    }

    fn apply_subscription(
        &self,
        session: &ClientSession,
        message_types: Vec<String>,
        transform_names: Vec<String>,
    ) -> Result<()> {
        if let Some(unsupported) = message_types
            .iter()
            .find(|t| !STREAMED_MESSAGE_TYPES.contains(&t.as_str()))
        {
            return Err(TrackingError::Protocol(format!(
                "unsupported message type '{}'",
                unsupported
            )));
        }
        for name in &transform_names {
            if !self.settings.known_transforms.contains(name) {
                warn!(client_id = session.id, transform = %name, "Subscribed transform is not produced by any channel");
            }
        }

        let profile = ClientProfile {
            message_types: if message_types.is_empty() {
                self.settings.default_profile.message_types.clone()
            } else {
                message_types
            },
            transform_names,
        };
        info!(
            client_id = session.id,
            types = ?profile.message_types,
            transforms = ?profile.transform_names,
            "Subscription updated"
        );
        *session
            .subscription
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = profile;
        Ok(())
    }

    /// Close a session
    ///
    /// Returns `true` only for the call that performed the transition;
    /// later calls for the same session are no-ops.
    pub async fn disconnect(&self, id: ClientId, reason: DisconnectReason) -> bool {
        let Some(session) = self.sessions.write().await.remove(&id) else {
            return false;
        };
        if session.disconnected.swap(true, Ordering::AcqRel) {
            return false;
        }

        info!(
            client_id = id,
            peer = %session.peer,
            reason = %reason,
            delivered = session.delivered.load(Ordering::Relaxed),
            dropped = session.dropped.load(Ordering::Relaxed),
            "Client disconnected"
        );

        // Aborting drops both socket halves; no await may follow this point
        // because the caller can be one of the aborted tasks.
        for task in lock(&session.tasks).iter() {
            task.abort();
        }
        true
    }

    /// Queue a frame for one client
    ///
    /// Returns `false` if the client is unknown or its queue is full.
    pub async fn enqueue(&self, id: ClientId, frame: Bytes) -> bool {
        match self.session(id).await {
            Some(session) => session.enqueue(frame),
            None => false,
        }
    }

    /// Disconnect every session with pending frames and no acknowledgement
    /// within the stall window
    pub async fn detect_stalled(&self, now: Instant) -> Vec<ClientId> {
        let window = self.settings.stall_timeout;
        let stalled: Vec<ClientId> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.is_stalled(now, window))
            .map(|s| s.id)
            .collect();

        let mut closed = Vec::with_capacity(stalled.len());
        for id in stalled {
            warn!(client_id = id, window_ms = window.as_millis() as u64, "Client stalled");
            if self.disconnect(id, DisconnectReason::Stalled).await {
                closed.push(id);
            }
        }
        closed
    }

    /// Queue a STATUS keep-alive for sessions idle for at least `interval`
    pub async fn send_keep_alives(&self, interval: Duration, now: Instant) -> usize {
        let mut sent = 0;
        for session in self.sessions().await {
            if session.idle_since(now) < interval {
                continue;
            }
            match session.enqueue_message(StatusMessage::ok("KeepAlive"), &self.settings.device_id) {
                Ok(true) => sent += 1,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Failed to encode keep-alive"),
            }
        }
        if sent > 0 {
            trace!(sent, "Keep-alives queued");
        }
        sent
    }

    /// Disconnect every session and wait for their tasks to finish
    pub async fn shutdown(&self) {
        let ids: Vec<ClientId> = self.sessions.read().await.keys().copied().collect();
        let mut tasks = Vec::new();
        for id in ids {
            let Some(session) = self.session(id).await else {
                continue;
            };
            self.disconnect(id, DisconnectReason::Shutdown).await;
            tasks.append(&mut lock(&session.tasks));
        }
        for task in tasks {
            let _ = task.await;
        }
        info!("All client sessions closed");
    }

    async fn session(&self, id: ClientId) -> Option<Arc<ClientSession>> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Connected sessions, in no particular order
    pub async fn sessions(&self) -> Vec<Arc<ClientSession>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn client_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn client_ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.sessions.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn client_info(&self, id: ClientId) -> Option<ClientInfo> {
        let session = self.session(id).await?;
        Some(ClientInfo {
            id,
            peer: session.peer,
            uptime: session.uptime(),
            subscription: session.subscription(),
            pending: session.pending.load(Ordering::Acquire),
            delivered: session.delivered.load(Ordering::Relaxed),
            dropped: session.dropped.load(Ordering::Relaxed),
            failed: session.failed.load(Ordering::Relaxed),
        })
    }

    fn handle_request(&self, session: &ClientSession, request: ClientRequest) -> Result<()> {
        let device = self.settings.device_id.as_str();
        match request {
            ClientRequest::Subscribe(info) => {
                self.apply_subscription(session, info.message_types, info.transform_names)?;
            }
            ClientRequest::GetCapability => {
                let types = SERVER_CAPABILITIES.iter().map(|t| t.to_string()).collect();
                session.enqueue_message(CapabilityMessage::new(types), device)?;
            }
            ClientRequest::GetStatus => {
                let text = format!("{} streaming", device);
                session.enqueue_message(StatusMessage::ok(&text), device)?;
            }
            ClientRequest::Status(status) => {
                trace!(client_id = session.id, code = status.code, "Client status received");
            }
            ClientRequest::Unsupported(type_name) => {
                warn!(client_id = session.id, msg_type = %type_name, "Ignoring unsupported message type");
            }
        }
        Ok(())
    }
}

async fn write_loop<W>(
    manager: Arc<SessionManager>,
    session: Arc<ClientSession>,
    mut writer: W,
    mut rx: mpsc::Receiver<Outgoing>,
) where
    W: AsyncWrite + Unpin,
{
    let settings = &manager.settings;

    while let Some(item) = rx.recv().await {
        let frame = match item {
            Outgoing::Frame(frame) => frame,
            Outgoing::Close(reason) => {
                manager.disconnect(session.id, reason).await;
                return;
            }
        };

        let mut pending = PendingMessage::new(frame);
        match pending.deliver(&mut writer, &settings.retry, settings.send_timeout).await {
            Ok(attempts) => {
                session.record_ack();
                if attempts > 1 {
                    debug!(client_id = session.id, attempts, "Frame delivered after retries");
                }
            }
            Err(e) => {
                session.failed.fetch_add(1, Ordering::Relaxed);
                warn!(client_id = session.id, error = %e, "Delivery failed");
                manager.disconnect(session.id, DisconnectReason::DeliveryFailed).await;
                return;
            }
        }
    }
}

async fn read_loop<R>(manager: Arc<SessionManager>, session: Arc<ClientSession>, mut reader: R)
where
    R: AsyncRead + Unpin,
{
    let crc_check = manager.settings.crc_check;

    let reason = loop {
        let result = match read_request(&mut reader, crc_check).await {
            Ok(Some(request)) => manager.handle_request(&session, request),
            Ok(None) => break DisconnectReason::ClosedByPeer,
            Err(TrackingError::Io(e)) => {
                debug!(client_id = session.id, error = %e, "Read failed");
                break DisconnectReason::ReadFailed;
            }
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!(client_id = session.id, error = %e, "Protocol error, closing session");
            let reply = IgtlMessage::new(StatusMessage::protocol_error(&e.to_string()), &manager.settings.device_id)
                .and_then(|msg| msg.encode());
            if let Ok(bytes) = reply {
                if session.close_after(Bytes::from(bytes), DisconnectReason::ProtocolError) {
                    // Writer closes the session after the reply
                    return;
                }
            }
            break DisconnectReason::ProtocolError;
        }
    };

    manager.disconnect(session.id, reason).await;
}

/// Read one request frame; `None` on a clean end of stream
async fn read_request<R>(reader: &mut R, verify_crc: bool) -> Result<Option<ClientRequest>>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; Header::SIZE];
    match reader.read_exact(&mut header_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let header = Header::decode(&header_buf)?;
    let body_size = header.checked_body_size(MAX_REQUEST_BODY_SIZE)?;
    let mut body = vec![0u8; body_size];
    reader.read_exact(&mut body).await?;

    trace!(
        msg_type = header.type_name.as_str().unwrap_or("UNKNOWN"),
        body_size,
        "Request received"
    );
    ClientRequest::decode(&header, &body, verify_crc).map(Some)
}

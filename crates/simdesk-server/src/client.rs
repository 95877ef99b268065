use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use simdesk_core::ids::SessionId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::chat::ChatEvent;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const SESSION_TIMEOUT: Duration = Duration::from_secs(90);

/// Lifecycle of one chat connection. `Closed` is terminal; a reconnect
/// is always a new session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Open = 1,
    Closed = 2,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Open,
            _ => Self::Closed,
        }
    }
}

/// Why a single delivery did not happen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("session channel unavailable")]
    ChannelUnavailable,
    #[error("session send queue full")]
    QueueFull,
}

/// A live chat connection. Outbound text goes through a bounded queue
/// drained by the connection's writer task.
pub struct Session {
    pub id: SessionId,
    tx: mpsc::Sender<String>,
    state: AtomicU8,
    last_pong: AtomicU64,
}

impl Session {
    fn new(id: SessionId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            tx,
            state: AtomicU8::new(SessionState::Connecting as u8),
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Connecting -> Open. Returns false if the session already left
    /// `Connecting`.
    pub fn open(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Connecting as u8,
                SessionState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn close(&self) {
        self.state.store(SessionState::Closed as u8, Ordering::Release);
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < SESSION_TIMEOUT.as_secs()
    }

    /// Queue `message` without waiting. Never blocks on a slow peer.
    pub fn deliver(&self, message: &str) -> Result<(), DeliveryError> {
        if !self.is_open() {
            return Err(DeliveryError::ChannelUnavailable);
        }
        match self.tx.try_send(message.to_string()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(DeliveryError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.close();
                Err(DeliveryError::ChannelUnavailable)
            }
        }
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Per-broadcast delivery tally.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub skipped: usize,
}

/// Registry of all live chat sessions.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
    max_send_queue: usize,
}

impl SessionRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new session in `Connecting` and return it with the
    /// receiving end of its send queue.
    pub fn register(&self) -> (Arc<Session>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let session = Arc::new(Session::new(SessionId::new(), tx));
        self.sessions.insert(session.id.clone(), Arc::clone(&session));
        (session, rx)
    }

    /// Close and remove a session. Returns false if it was already gone.
    pub fn unregister(&self, id: &SessionId) -> bool {
        match self.sessions.remove(id) {
            Some((_, session)) => {
                session.close();
                true
            }
            None => false,
        }
    }

    /// Send `message` to every open session. Sessions that are not open
    /// or whose queue is full are skipped; nothing aborts the fan-out.
    pub fn broadcast(&self, message: &str) -> BroadcastReport {
        self.broadcast_sequenced(message, &mut HashSet::new())
    }

    /// One message of an ordered series. Sessions already in `missed` are
    /// skipped, and every session this message misses is added to it, so
    /// no session receives a later message without the earlier ones.
    pub fn broadcast_sequenced(&self, message: &str, missed: &mut HashSet<SessionId>) -> BroadcastReport {
        // Snapshot first so no shard lock is held while sending.
        let targets: Vec<Arc<Session>> = self.sessions.iter().map(|e| Arc::clone(e.value())).collect();

        let mut report = BroadcastReport::default();
        for session in targets {
            if missed.contains(&session.id) {
                tracing::debug!(session_id = %session.id, "Skipping session that missed an earlier message");
                report.skipped += 1;
                continue;
            }
            let result = session.deliver(message);
            if result.is_err() {
                missed.insert(session.id.clone());
            }
            match result {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::QueueFull) => {
                    tracing::warn!(
                        session_id = %session.id,
                        msg_len = message.len(),
                        "Send queue full, dropping message"
                    );
                    report.skipped += 1;
                }
                Err(DeliveryError::ChannelUnavailable) => {
                    tracing::debug!(session_id = %session.id, state = ?session.state(), "Skipping unavailable session");
                    report.skipped += 1;
                }
            }
        }
        report
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn open_count(&self) -> usize {
        self.sessions.iter().filter(|e| e.value().is_open()).count()
    }

    /// Remove sessions that stopped answering pings.
    pub fn cleanup_dead_sessions(&self) -> usize {
        let dead: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|e| !e.value().is_alive())
            .map(|e| e.key().clone())
            .collect();

        let mut removed = 0;
        for id in dead {
            if self.unregister(&id) {
                removed += 1;
                tracing::info!(session_id = %id, "Cleaned up dead session");
            }
        }
        removed
    }
}

/// Drive one WebSocket: a writer drains the session queue (plus
/// heartbeat pings), a reader forwards text frames as chat events.
/// Returns once either side ends; the session is then unregistered.
pub async fn handle_ws_connection(
    socket: WebSocket,
    session: Arc<Session>,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<SessionRegistry>,
    events: mpsc::Sender<ChatEvent>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_id = session.id.clone();
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(session_id = %writer_id, "Sent ping");
                }
            }
        }
    });

    session.open();
    let _ = events.send(ChatEvent::Connected(session.id.clone())).await;

    let reader_session = Arc::clone(&session);
    let reader_events = events.clone();
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    let event = ChatEvent::Message {
                        from: reader_session.id.clone(),
                        text: text.to_string(),
                    };
                    if reader_events.send(event).await.is_err() {
                        break;
                    }
                }
                WsMessage::Pong(_) => reader_session.record_pong(),
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    join_first(writer, reader).await;

    session.close();
    registry.unregister(&session.id);
    let _ = events.send(ChatEvent::Disconnected(session.id.clone())).await;
}

/// Wait for whichever task ends first and abort the other.
async fn join_first(mut a: JoinHandle<()>, mut b: JoinHandle<()>) {
    tokio::select! {
        _ = &mut a => b.abort(),
        _ = &mut b => a.abort(),
    }
}

/// Periodically drop dead sessions until `shutdown` fires.
pub fn start_cleanup_task(
    registry: Arc<SessionRegistry>,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = registry.cleanup_dead_sessions();
                    if removed > 0 {
                        tracing::info!(removed, "Dead session cleanup");
                    }
                }
            }
        }
    })
}

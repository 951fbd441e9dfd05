//! Session Registry
//!
//! Tracks every connected client from the moment its socket is accepted
//! until it disconnects. The registry owns the outbound half of each
//! connection; match tasks and the room manager reach clients through it.
//!
//! A session counts as active while bytes move in either direction: the
//! reader marks inbound messages and the writer marks every frame it
//! flushes, so a quiet spectator that keeps receiving state stays alive.
//!
//! Connect and disconnect events are published on a broadcast channel so
//! the room manager can detach departed sessions from their matches.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use tokio::sync::{broadcast, mpsc, Notify, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::game::state::PlayerId;
use crate::network::protocol::{ClientRole, ServerMessage};

/// Capacity of each connection's outbound queue.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Capacity of the session event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Unique session identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from the hyphenated string form.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    /// Simulation id of the player controlled by this session.
    pub fn player_id(&self) -> PlayerId {
        PlayerId::from_uuid(self.0)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// CONNECTIONS
// =============================================================================

/// Transport a session arrived on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    /// Newline-delimited JSON over TCP
    Tcp,
    /// JSON text frames over WebSocket
    WebSocket,
}

/// Last time a connection moved data, shared between its reader and writer.
#[derive(Clone, Debug)]
pub struct ActivityClock {
    origin: Instant,
    last_ms: Arc<AtomicU64>,
}

impl ActivityClock {
    /// A clock that was last active now.
    pub fn new() -> Self {
        Self { origin: Instant::now(), last_ms: Arc::new(AtomicU64::new(0)) }
    }

    /// Record activity at the current instant.
    pub fn mark(&self) {
        let now = self.origin.elapsed().as_millis() as u64;
        self.last_ms.fetch_max(now, Ordering::Relaxed);
    }

    /// Time since the last recorded activity.
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(last)
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Outbound half of a client connection.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    /// Remote address
    pub peer: SocketAddr,
    /// Transport in use
    pub transport: Transport,
    /// Queue drained by the connection's writer task
    pub sender: mpsc::Sender<ServerMessage>,
    activity: ActivityClock,
    close: Arc<Notify>,
}

impl ConnectionHandle {
    /// Wrap the sending side of a connection.
    pub fn new(peer: SocketAddr, transport: Transport, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self { peer, transport, sender, activity: ActivityClock::new(), close: Arc::new(Notify::new()) }
    }

    /// Activity clock for the writer task to mark after each flushed frame.
    pub fn activity(&self) -> ActivityClock {
        self.activity.clone()
    }

    /// Time since data last moved on this connection.
    pub fn idle_for(&self) -> Duration {
        self.activity.idle_for()
    }

    /// Queue a message without waiting. Returns false if it was not queued.
    pub fn try_send(&self, message: ServerMessage) -> bool {
        self.sender.try_send(message).is_ok()
    }

    /// Ask the connection's reader loop to shut down.
    pub fn close(&self) {
        self.close.notify_one();
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        self.close.notified().await;
    }
}

/// A connected client.
#[derive(Clone, Debug)]
pub struct Session {
    /// Session id
    pub id: SessionId,
    /// Outbound connection
    pub handle: ConnectionHandle,
    /// Name announced by `CONNECT`
    pub display_id: Option<String>,
    /// Role announced by `CONNECT`
    pub role: ClientRole,
    /// Wall-clock connect time
    pub connected_at: DateTime<Utc>,
}

impl Session {
    /// Name to show to other clients.
    pub fn display_name(&self) -> String {
        self.display_id.clone().unwrap_or_else(|| self.id.to_string())
    }
}

/// Why a session went away.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Socket closed or failed
    Closed,
    /// Client sent `DISCONNECT`
    Requested,
    /// No message within the idle timeout
    Timeout,
    /// Outbound queue closed or stayed full
    Unreachable,
    /// Server shutdown
    Shutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DisconnectReason::Closed => "closed",
            DisconnectReason::Requested => "requested",
            DisconnectReason::Timeout => "timeout",
            DisconnectReason::Unreachable => "unreachable",
            DisconnectReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Registry lifecycle notifications.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// A session was registered
    Connected(SessionId),
    /// A session was unregistered
    Disconnected {
        /// The departed session
        id: SessionId,
        /// Why it left
        reason: DisconnectReason,
    },
}

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Unknown session.
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// Connection limit reached.
    #[error("connection limit of {limit} reached")]
    Full {
        /// Configured limit
        limit: usize,
    },
}

// =============================================================================
// SESSION REGISTRY
// =============================================================================

/// All connected sessions.
pub struct SessionRegistry {
    /// Sessions by id.
    sessions: RwLock<BTreeMap<SessionId, Session>>,
    /// Lifecycle events.
    events: broadcast::Sender<SessionEvent>,
    /// Connection limit.
    max_sessions: usize,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new(max_sessions: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            sessions: RwLock::new(BTreeMap::new()),
            events,
            max_sessions,
        }
    }

    /// Register a new connection.
    pub async fn register(&self, handle: ConnectionHandle) -> Result<SessionId, RegistryError> {
        let id = SessionId::new();
        let peer = handle.peer;
        {
            let mut sessions = self.sessions.write().await;
            if sessions.len() >= self.max_sessions {
                return Err(RegistryError::Full { limit: self.max_sessions });
            }
            sessions.insert(id, Session {
                id,
                handle,
                display_id: None,
                role: ClientRole::Player,
                connected_at: Utc::now(),
            });
        }

        debug!(session = %id, %peer, "session registered");
        let _ = self.events.send(SessionEvent::Connected(id));
        Ok(id)
    }

    /// Remove a session. Returns it if it was still registered.
    pub async fn unregister(&self, id: &SessionId, reason: DisconnectReason) -> Option<Session> {
        let removed = self.sessions.write().await.remove(id)?;

        info!(session = %id, %reason, "session unregistered");
        let _ = self.events.send(SessionEvent::Disconnected { id: *id, reason });
        Some(removed)
    }

    /// Look up a session.
    pub async fn lookup(&self, id: &SessionId) -> Result<Session, RegistryError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(RegistryError::NotFound(*id))
    }

    /// Record inbound activity.
    pub async fn touch(&self, id: &SessionId) {
        if let Some(session) = self.sessions.read().await.get(id) {
            session.handle.activity.mark();
        }
    }

    /// Remember what the client announced in `CONNECT`.
    pub async fn set_identity(
        &self,
        id: &SessionId,
        display_id: Option<String>,
        role: ClientRole,
    ) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(id).ok_or(RegistryError::NotFound(*id))?;
        session.display_id = display_id;
        session.role = role;
        Ok(())
    }

    /// Unregister sessions with no traffic either way for `timeout`.
    ///
    /// Their connections are told to close. Returns the removed ids.
    pub async fn sweep_idle(&self, timeout: Duration) -> Vec<SessionId> {
        let idle: Vec<Session> = {
            let mut sessions = self.sessions.write().await;
            let ids: Vec<SessionId> = sessions
                .values()
                .filter(|s| s.handle.idle_for() >= timeout)
                .map(|s| s.id)
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        for session in &idle {
            info!(session = %session.id, "idle session timed out");
            session.handle.close();
            let _ = self.events.send(SessionEvent::Disconnected {
                id: session.id,
                reason: DisconnectReason::Timeout,
            });
        }

        idle.into_iter().map(|s| s.id).collect()
    }

    /// Number of registered sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Snapshot of all sessions in id order.
    pub async fn list(&self) -> Vec<Session> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Subscribe to connect/disconnect events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}

//! Room Layer
//!
//! Matches, their membership, and the tasks that run them.
//!
//! ## Module Structure
//!
//! - `manager`: Match creation, joins, leaves, teardown
//! - `actor`: One task per match owning its simulation
//! - `broadcast`: Snapshot/delta fan-out to participants
//! - `delta`: Snapshot diffing
//! - `telemetry`: Per-match counters and tick timing

pub mod manager;
pub mod actor;
pub mod broadcast;
pub mod delta;
pub mod telemetry;

use std::fmt;

use serde::{Serialize, Deserialize};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::game::events::EndReason;
use crate::game::input::PlayerAction;
use crate::game::state::{CrocodileKind, MatchPhase};
use crate::game::tick::MatchConfig;
use crate::network::protocol::{ClientRole, ErrorCode, ServerMessage, WelcomeInfo};
use crate::network::session::{RegistryError, SessionId};

pub use manager::RoomManager;
pub use actor::{MatchActor, MatchHandle};
pub use broadcast::{BroadcastConfig, StateBroadcaster};
pub use telemetry::{MatchTelemetry, TelemetrySnapshot};

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Unique match identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MatchId(pub Uuid);

impl MatchId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from the hyphenated string form.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    /// Raw bytes, used to seed the simulation.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for MatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Limits and timing shared by every match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomConfig {
    /// Concurrent matches allowed
    pub max_matches: usize,
    /// Player slots per match
    pub max_players_per_match: usize,
    /// Spectator slots per match
    pub max_spectators_per_match: usize,
    /// Players needed before a match starts running
    pub min_players_to_start: usize,
    /// Simulation parameters
    pub match_config: MatchConfig,
    /// Snapshot fan-out parameters
    pub broadcast: BroadcastConfig,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_matches: 8,
            max_players_per_match: 2,
            max_spectators_per_match: 4,
            min_players_to_start: 1,
            match_config: MatchConfig::default(),
            broadcast: BroadcastConfig::default(),
        }
    }
}

/// Server details announced in the `WELCOME` a session gets on joining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    /// Tick rate announced to clients
    pub tick_rate: u32,
    /// Server version string
    pub server_version: String,
}

impl Greeting {
    /// The `WELCOME` for a session placed in `match_id`.
    pub fn welcome(&self, session: SessionId, match_id: MatchId, role: ClientRole) -> ServerMessage {
        ServerMessage::Welcome(WelcomeInfo {
            session_id: session.to_string(),
            match_id: Some(match_id.to_string()),
            role,
            tick_rate: self.tick_rate,
            server_version: self.server_version.clone(),
        })
    }
}

// =============================================================================
// MATCH TASK MESSAGES
// =============================================================================

/// Operator command applied inside a match task.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchCommand {
    /// Place a crocodile
    SpawnCrocodile {
        /// Red or blue
        kind: CrocodileKind,
        /// Vine index
        vine: u8,
        /// Height
        y: f64,
    },
    /// Hang a fruit
    AddFruit {
        /// Vine index
        vine: u8,
        /// Height
        y: f64,
        /// Points on pickup
        points: u32,
    },
    /// Remove a fruit near a height
    RemoveFruit {
        /// Vine index
        vine: u8,
        /// Height
        y: f64,
    },
    /// Describe crocodiles and fruits
    ListEntities,
    /// Freeze the simulation
    Pause,
    /// Unfreeze the simulation
    Resume,
}

/// Control messages for a match task, applied before inputs each tick.
#[derive(Debug)]
pub enum MatchControl {
    /// A session joined
    Join {
        /// Joining session
        session: SessionId,
        /// Name shown to others
        name: String,
        /// Player or spectator
        role: ClientRole,
        /// The session's outbound queue
        sender: mpsc::Sender<ServerMessage>,
    },
    /// A session left
    Leave {
        /// Departing session
        session: SessionId,
    },
    /// A session acknowledged a tick
    Ack {
        /// Acknowledging session
        session: SessionId,
        /// Tick applied by the client
        tick: u64,
    },
    /// Operator command with its reply channel
    Admin {
        /// Command
        command: MatchCommand,
        /// Outcome text, or the rejection message
        reply: oneshot::Sender<Result<String, String>>,
    },
    /// End the match
    Stop {
        /// Reason given to clients
        reason: EndReason,
    },
}

/// A player action on its way to a match task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputCommand {
    /// Sending session
    pub session: SessionId,
    /// Action
    pub action: PlayerAction,
    /// Client sequence number
    pub seq: Option<u64>,
}

/// Published by a match task after every tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchStatus {
    /// Phase
    pub phase: MatchPhase,
    /// Current tick
    pub tick: u64,
    /// Players in the simulation
    pub players: usize,
    /// Broadcast recipients that are spectators
    pub spectators: usize,
    /// Admin pause
    pub paused: bool,
    /// Counters as of this tick
    pub telemetry: TelemetrySnapshot,
}

/// Reports from match tasks to the room manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomNotice {
    /// A participant could not be reached and was dropped
    Unreachable {
        /// Match reporting
        match_id: MatchId,
        /// Dropped session
        session: SessionId,
    },
    /// A match finished and its task stopped
    Ended {
        /// Finished match
        match_id: MatchId,
        /// Why it ended
        reason: EndReason,
    },
}

// =============================================================================
// ERRORS
// =============================================================================

/// Room manager errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    /// Unknown session.
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    /// Unknown match.
    #[error("match {0} not found")]
    MatchNotFound(String),

    /// Session already belongs to a match.
    #[error("session {0} is already in a match")]
    AlreadyInMatch(SessionId),

    /// Another player in the match uses this name.
    #[error("player '{0}' is already in this match")]
    NameTaken(String),

    /// Session is not in a match.
    #[error("not in a match")]
    NotInMatch,

    /// No free player slot.
    #[error("match is full ({max} players)")]
    MatchFull {
        /// Player slots
        max: usize,
    },

    /// No free spectator slot.
    #[error("no spectator slots left ({max})")]
    SpectatorsFull {
        /// Spectator slots
        max: usize,
    },

    /// Server is at its match limit.
    #[error("server is at its limit of {max} matches")]
    CapacityExceeded {
        /// Match limit
        max: usize,
    },

    /// Match already ended.
    #[error("match has ended")]
    MatchEnded,

    /// No match is running.
    #[error("no active match")]
    NoActiveMatch,

    /// Nothing to watch or nobody to start with.
    #[error("match has no players")]
    NoPlayers,

    /// Spectators cannot send inputs.
    #[error("spectators cannot control a player")]
    SpectatorNotAllowed,

    /// Match task refused an operator command.
    #[error("{0}")]
    Rejected(String),
}

impl From<RegistryError> for RoomError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => RoomError::SessionNotFound(id),
            RegistryError::Full { .. } => RoomError::Rejected(err.to_string()),
        }
    }
}

impl RoomError {
    /// Protocol error code sent to the client.
    pub fn code(&self) -> ErrorCode {
        match self {
            RoomError::SessionNotFound(_) => ErrorCode::NotConnected,
            RoomError::MatchNotFound(_) => ErrorCode::MatchNotFound,
            RoomError::AlreadyInMatch(_) | RoomError::NameTaken(_) => ErrorCode::AlreadyInMatch,
            RoomError::NotInMatch => ErrorCode::NotInMatch,
            RoomError::MatchFull { .. } => ErrorCode::MatchFull,
            RoomError::SpectatorsFull { .. } => ErrorCode::SpectatorsFull,
            RoomError::CapacityExceeded { .. } => ErrorCode::CapacityExceeded,
            RoomError::MatchEnded => ErrorCode::MatchEnded,
            RoomError::NoActiveMatch | RoomError::NoPlayers => ErrorCode::MatchNotFound,
            RoomError::SpectatorNotAllowed => ErrorCode::SpectatorNotAllowed,
            RoomError::Rejected(_) => ErrorCode::InternalError,
        }
    }

    /// The `ERROR` message for this failure.
    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::error(self.code(), self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_id_parse() {
        let id = MatchId::new();
        assert_eq!(MatchId::parse(&id.to_string()), Some(id));
        assert_eq!(MatchId::parse("lobby"), None);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(RoomError::CapacityExceeded { max: 2 }.code(), ErrorCode::CapacityExceeded);
        assert_eq!(RoomError::NotInMatch.code(), ErrorCode::NotInMatch);

        let msg = RoomError::MatchFull { max: 2 }.to_message();
        let json = msg.to_json().unwrap();
        assert!(json.contains("MATCH_FULL"));
        assert!(json.contains("match is full (2 players)"));

        assert_eq!(RoomError::NameTaken("alice".into()).code(), ErrorCode::AlreadyInMatch);
    }

    #[test]
    fn test_greeting_welcome() {
        let greeting = Greeting { tick_rate: 30, server_version: "1.2.3".to_string() };
        let session = SessionId::new();
        let match_id = MatchId::new();

        match greeting.welcome(session, match_id, ClientRole::Spectator) {
            ServerMessage::Welcome(info) => {
                assert_eq!(info.session_id, session.to_string());
                assert_eq!(info.match_id, Some(match_id.to_string()));
                assert_eq!(info.role, ClientRole::Spectator);
                assert_eq!(info.tick_rate, 30);
                assert_eq!(info.server_version, "1.2.3");
            }
            other => panic!("expected WELCOME, got {:?}", other),
        }
    }
}

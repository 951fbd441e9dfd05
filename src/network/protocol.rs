//! Protocol Messages
//!
//! Wire format for client-server communication. Every message is one JSON
//! object tagged by its `type` field: one line per message over TCP, one
//! text frame per message over WebSocket.

use std::collections::BTreeMap;

use serde::{Serialize, Deserialize};
use serde_json::json;

use crate::core::fixed::to_float;
use crate::game::events::{EndReason, GameEvent, GameEventData};
use crate::game::input::PlayerAction;
use crate::game::state::{CrocodileKind, Facing, MatchPhase, PlayerId, SimulationState};

/// Longest accepted line on the TCP transport.
pub const MAX_LINE_BYTES: usize = 16 * 1024;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Announce identity and role; answered with `WELCOME`.
    Connect(ConnectRequest),

    /// A player action for the next tick.
    Input(InputRequest),

    /// Latest tick the client has applied.
    Ack {
        /// Acknowledged tick
        tick: u64,
    },

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back
        timestamp: u64,
    },

    /// Start a new match and join it.
    CreateMatch,

    /// Leave the current match.
    LeaveMatch,

    /// Request the match list.
    ListMatches,

    /// Close the session.
    Disconnect,
}

/// How a client takes part in a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientRole {
    /// Controls a character
    #[default]
    #[serde(alias = "player")]
    Player,
    /// Watches only
    #[serde(alias = "spectator", alias = "OBSERVER", alias = "observer")]
    Spectator,
}

/// Handshake request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    /// Name the client wants to appear under.
    #[serde(default, alias = "id")]
    pub player_id: Option<String>,
    /// Player or spectator.
    #[serde(default)]
    pub client_type: ClientRole,
    /// Match to join; quick join (or first watchable match) when absent.
    #[serde(default)]
    pub match_id: Option<String>,
}

/// Player input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRequest {
    /// The action.
    pub action: PlayerAction,
    /// Optional client sequence number; stale values are dropped.
    #[serde(default)]
    pub seq: Option<u64>,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    /// Handshake accepted.
    Welcome(WelcomeInfo),

    /// Full state snapshot.
    State {
        /// Snapshot
        data: StateSnapshot,
    },

    /// Changes since an acknowledged snapshot.
    Delta {
        /// Delta
        data: StateDelta,
    },

    /// Game event notification.
    Event {
        /// Event name (`FRUIT_TAKEN`, ...)
        name: String,
        /// Event fields
        payload: serde_json::Value,
    },

    /// Match ended.
    MatchEnd(MatchEndInfo),

    /// Current matches.
    MatchList {
        /// One entry per match
        matches: Vec<MatchSummary>,
    },

    /// The session left its match.
    LeftMatch {
        /// Match that was left
        #[serde(rename = "matchId")]
        match_id: String,
    },

    /// Pong response.
    Pong {
        /// Echoed client timestamp
        timestamp: u64,
        /// Server wall clock in milliseconds
        #[serde(rename = "serverTime")]
        server_time: i64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Human-readable reason
        reason: String,
    },
}

/// Handshake answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomeInfo {
    /// Assigned session id.
    pub session_id: String,
    /// Joined match, if any.
    pub match_id: Option<String>,
    /// Role granted.
    pub role: ClientRole,
    /// Simulation ticks per second.
    pub tick_rate: u32,
    /// Server version.
    pub server_version: String,
}

/// Player entry in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    /// Name announced at connect
    pub id: String,
    /// Owning session
    pub session_id: String,
    /// Column
    pub x: f64,
    /// Height
    pub y: f64,
    /// Horizontal velocity
    pub vx: f64,
    /// Vertical velocity
    pub vy: f64,
    /// Held vine
    #[serde(rename = "liana")]
    pub vine: Option<u8>,
    /// `GROUND`, `ON_VINE`, `AIRBORNE`, `CELEBRATING` or `DEAD`
    pub mode: String,
    /// Sprite direction
    pub facing: Facing,
    /// Remaining lives
    pub lives: u8,
    /// Score
    pub score: u32,
    /// Completed rescues
    pub rescues: u32,
    /// Still in play
    pub active: bool,
}

/// Crocodile entry in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrocodileSnapshot {
    /// Crocodile ID
    pub id: u32,
    /// Red or blue
    pub kind: CrocodileKind,
    /// Vine index
    #[serde(rename = "liana")]
    pub vine: u8,
    /// Height
    pub y: f64,
    /// +1 down, -1 up
    pub direction: i8,
}

/// Fruit entry in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FruitSnapshot {
    /// Fruit ID
    pub id: u32,
    /// Vine index
    #[serde(rename = "liana")]
    pub vine: u8,
    /// Height
    pub y: f64,
    /// Points on pickup
    pub points: u32,
}

/// Complete view of a match at one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    /// Tick
    pub tick: u64,
    /// Level, from 1
    pub level: u32,
    /// Crocodile speed multiplier
    pub speed_multiplier: f64,
    /// Admin pause
    pub paused: bool,
    /// Match phase
    pub phase: MatchPhase,
    /// Hex SHA-256 of the simulation state
    pub state_hash: String,
    /// Players in id order
    pub players: Vec<PlayerSnapshot>,
    /// Crocodiles in id order
    pub crocodiles: Vec<CrocodileSnapshot>,
    /// Fruits in id order
    pub fruits: Vec<FruitSnapshot>,
}

impl StateSnapshot {
    /// Capture the client view of a simulation.
    ///
    /// `names` maps players to the name they announced; players without
    /// one are shown by session id.
    pub fn capture(state: &SimulationState, names: &BTreeMap<PlayerId, String>) -> Self {
        let players = state
            .players
            .values()
            .map(|p| {
                let session_id = p.id.to_uuid_string();
                PlayerSnapshot {
                    id: names.get(&p.id).cloned().unwrap_or_else(|| session_id.clone()),
                    session_id,
                    x: to_float(p.position.x),
                    y: to_float(p.position.y),
                    vx: to_float(p.velocity.x),
                    vy: to_float(p.velocity.y),
                    vine: p.vine(),
                    mode: p.mode.as_str().to_string(),
                    facing: p.facing,
                    lives: p.lives,
                    score: p.score,
                    rescues: p.rescues,
                    active: p.is_alive(),
                }
            })
            .collect();

        let crocodiles = state
            .crocodiles
            .values()
            .map(|c| CrocodileSnapshot {
                id: c.id,
                kind: c.kind,
                vine: c.vine,
                y: to_float(c.y),
                direction: c.direction,
            })
            .collect();

        let fruits = state
            .fruits
            .values()
            .map(|f| FruitSnapshot { id: f.id, vine: f.vine, y: to_float(f.y), points: f.points })
            .collect();

        Self {
            tick: state.tick,
            level: state.level,
            speed_multiplier: to_float(state.difficulty),
            paused: state.paused,
            phase: state.phase,
            state_hash: hex::encode(state.compute_hash()),
            players,
            crocodiles,
            fruits,
        }
    }
}

/// Changes between an acknowledged snapshot and the current one.
///
/// The match-wide header is always present; entity lists only carry new or
/// changed entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDelta {
    /// Tick the delta applies to
    pub base_tick: u64,
    /// Tick after applying
    pub tick: u64,
    /// Level
    pub level: u32,
    /// Crocodile speed multiplier
    pub speed_multiplier: f64,
    /// Admin pause
    pub paused: bool,
    /// Match phase
    pub phase: MatchPhase,
    /// Hex state hash after applying
    pub state_hash: String,
    /// New or changed players
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub players: Vec<PlayerSnapshot>,
    /// New or changed crocodiles
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub crocodiles: Vec<CrocodileSnapshot>,
    /// New or changed fruits
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fruits: Vec<FruitSnapshot>,
    /// Session ids of players gone since the base
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed_players: Vec<String>,
    /// Crocodiles gone since the base
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed_crocodiles: Vec<u32>,
    /// Fruits gone since the base
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed_fruits: Vec<u32>,
}

/// Final standing of one player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalScore {
    /// Player name
    pub player_id: String,
    /// Score
    pub score: u32,
    /// Completed rescues
    pub rescues: u32,
    /// Lives left
    pub lives: u8,
}

/// Match end information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchEndInfo {
    /// Match identifier
    pub match_id: String,
    /// Why it ended
    pub reason: EndReason,
    /// Winner name, if any
    pub winner_id: Option<String>,
    /// Last simulated tick
    pub final_tick: u64,
    /// Final state hash
    pub state_hash: String,
    /// Standings in player id order
    pub scores: Vec<FinalScore>,
}

impl MatchEndInfo {
    /// Summarize an ended simulation.
    pub fn from_state(
        match_id: String,
        state: &SimulationState,
        reason: EndReason,
        names: &BTreeMap<PlayerId, String>,
    ) -> Self {
        let winner = state.outcome.and_then(|o| o.winner);
        Self {
            match_id,
            reason,
            winner_id: winner.map(|id| display_name(names, &id)),
            final_tick: state.tick,
            state_hash: hex::encode(state.compute_hash()),
            scores: state
                .players
                .values()
                .map(|p| FinalScore {
                    player_id: display_name(names, &p.id),
                    score: p.score,
                    rescues: p.rescues,
                    lives: p.lives,
                })
                .collect(),
        }
    }
}

/// One entry of `MATCH_LIST`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSummary {
    /// Match identifier
    pub match_id: String,
    /// Phase
    pub phase: MatchPhase,
    /// Current tick
    pub tick: u64,
    /// Players in the match
    pub players: usize,
    /// Spectators watching
    pub spectators: usize,
    /// Player slots
    pub max_players: usize,
    /// Admin pause
    pub paused: bool,
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Unparseable or unknown message.
    InvalidMessage,
    /// Message requires a prior `CONNECT`.
    NotConnected,
    /// Session is not in a match.
    NotInMatch,
    /// Session is already in a match.
    AlreadyInMatch,
    /// No free player slot.
    MatchFull,
    /// No free spectator slot.
    SpectatorsFull,
    /// Server is at its match limit.
    CapacityExceeded,
    /// Match not found.
    MatchNotFound,
    /// Match already ended.
    MatchEnded,
    /// Spectators cannot do this.
    SpectatorNotAllowed,
    /// Connection limit reached.
    ServerFull,
    /// Internal error.
    InternalError,
}

impl ServerMessage {
    /// Build an `ERROR` message.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError { code, message: message.into() })
    }

    /// Build an `EVENT` message from a simulation event.
    pub fn event(event: &GameEvent, names: &BTreeMap<PlayerId, String>) -> Self {
        let name = |id: &PlayerId| display_name(names, id);
        let payload = match &event.data {
            GameEventData::PlayerJoined { player_id } | GameEventData::PlayerLeft { player_id } => {
                json!({ "playerId": name(player_id) })
            }
            GameEventData::MatchStarted { players } => json!({ "players": players }),
            GameEventData::FruitTaken { player_id, fruit_id, points, new_score } => json!({
                "playerId": name(player_id),
                "fruitId": fruit_id,
                "points": points,
                "score": new_score,
            }),
            GameEventData::PlayerHit { player_id, crocodile_id, lives_left } => json!({
                "playerId": name(player_id),
                "crocodileId": crocodile_id,
                "lives": lives_left,
            }),
            GameEventData::PlayerDrowned { player_id, lives_left } => {
                json!({ "playerId": name(player_id), "lives": lives_left })
            }
            GameEventData::PlayerEliminated { player_id } | GameEventData::PlayerWin { player_id } => {
                json!({ "playerId": name(player_id) })
            }
            GameEventData::PlayerRescue { player_id, rescues, new_score } => json!({
                "playerId": name(player_id),
                "rescues": rescues,
                "score": new_score,
            }),
            GameEventData::LevelUp { player_id, level, difficulty } => json!({
                "playerId": name(player_id),
                "level": level,
                "speedMultiplier": to_float(*difficulty),
            }),
            GameEventData::MatchEnded { winner_id, reason, duration_ticks } => json!({
                "winnerId": winner_id.as_ref().map(name),
                "reason": reason,
                "durationTicks": duration_ticks,
            }),
        };

        ServerMessage::Event { name: event.name().to_string(), payload }
    }
}

fn display_name(names: &BTreeMap<PlayerId, String>, id: &PlayerId) -> String {
    names.get(id).cloned().unwrap_or_else(|| id.to_uuid_string())
}

// =============================================================================
// ERRORS
// =============================================================================

/// Failure to read a client message.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Not valid JSON or not a known message.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Line longer than [`MAX_LINE_BYTES`].
    #[error("message exceeds {limit} bytes")]
    TooLong {
        /// Limit in bytes
        limit: usize,
    },

    /// Blank line.
    #[error("empty message")]
    Empty,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Parse one line or frame received from a client.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        if raw.len() > MAX_LINE_BYTES {
            return Err(ProtocolError::TooLong { limit: MAX_LINE_BYTES });
        }
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ProtocolError::Empty);
        }
        Ok(Self::from_json(trimmed)?)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

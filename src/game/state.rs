//! Game State Definitions
//!
//! All state types for the platform simulation.
//! Uses BTreeMap for deterministic iteration order.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

use crate::core::fixed::{
    Fixed, FIXED_ONE, to_float,
    STARTING_LIVES, WORLD_BOTTOM,
};
use crate::core::vec2::FixedVec2;
use crate::core::rng::DeterministicRng;
use crate::core::hash::{StateHash, StateHasher, compute_state_hash};
use crate::game::events::{EndReason, GameEvent};
use crate::game::input::{Intent, InputQueue, PlayerAction, QueuedInput};
use crate::game::map::JungleMap;

// =============================================================================
// PLAYER ID
// =============================================================================

/// Unique player identifier (UUID as bytes).
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct PlayerId(pub [u8; 16]);

impl PlayerId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Create from a UUID.
    pub fn from_uuid(id: uuid::Uuid) -> Self {
        Self(*id.as_bytes())
    }

    /// Convert to UUID string.
    pub fn to_uuid_string(&self) -> String {
        uuid::Uuid::from_bytes(self.0).to_string()
    }

    /// First four bytes as hex, for logs.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

// =============================================================================
// PLAYER STATE
// =============================================================================

/// What the player is doing physically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerMode {
    /// Standing or walking on a platform
    #[default]
    Ground,
    /// Holding a vine
    OnVine {
        /// Index of the held vine
        vine: u8,
    },
    /// Jumping or falling
    Airborne,
    /// Frozen after a rescue
    Celebrating,
    /// Out of lives
    Dead,
}

impl PlayerMode {
    fn tag(self) -> u8 {
        match self {
            PlayerMode::Ground => 0,
            PlayerMode::OnVine { .. } => 1,
            PlayerMode::Airborne => 2,
            PlayerMode::Celebrating => 3,
            PlayerMode::Dead => 4,
        }
    }

    /// Wire name of the mode.
    pub fn as_str(self) -> &'static str {
        match self {
            PlayerMode::Ground => "GROUND",
            PlayerMode::OnVine { .. } => "ON_VINE",
            PlayerMode::Airborne => "AIRBORNE",
            PlayerMode::Celebrating => "CELEBRATING",
            PlayerMode::Dead => "DEAD",
        }
    }
}

/// Direction the sprite faces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Facing {
    /// Facing left
    Left,
    /// Facing right
    #[default]
    Right,
}

/// State of a single player in the match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlayerState {
    /// Unique player ID
    pub id: PlayerId,

    /// Position (x in columns, y in screen units)
    pub position: FixedVec2,

    /// Velocity per second
    pub velocity: FixedVec2,

    /// Physical mode
    pub mode: PlayerMode,

    /// Sprite direction
    pub facing: Facing,

    /// Remaining lives
    pub lives: u8,

    /// Accumulated score
    pub score: u32,

    /// Completed rescues
    pub rescues: u32,

    /// Current held input
    pub intent: Intent,

    /// Ticks until another vine switch is allowed
    pub vine_cooldown: u32,

    /// Ticks of protection after a respawn
    pub invulnerable_ticks: u32,

    /// Ticks left in the rescue celebration
    pub celebrate_ticks: u32,
}

impl PlayerState {
    /// Create a new player at the spawn point.
    pub fn new(id: PlayerId, spawn: FixedVec2) -> Self {
        Self {
            id,
            position: spawn,
            velocity: FixedVec2::ZERO,
            mode: PlayerMode::Ground,
            facing: Facing::Right,
            lives: STARTING_LIVES,
            score: 0,
            rescues: 0,
            intent: Intent::default(),
            vine_cooldown: 0,
            invulnerable_ticks: 0,
            celebrate_ticks: 0,
        }
    }

    /// Whether the player still has lives.
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.mode != PlayerMode::Dead
    }

    /// Whether crocodiles and fruits interact with the player.
    #[inline]
    pub fn is_interactive(&self) -> bool {
        !matches!(self.mode, PlayerMode::Dead | PlayerMode::Celebrating)
    }

    /// Index of the held vine, if any.
    pub fn vine(&self) -> Option<u8> {
        match self.mode {
            PlayerMode::OnVine { vine } => Some(vine),
            _ => None,
        }
    }

    /// Put the player back at the spawn point.
    pub fn respawn(&mut self, spawn: FixedVec2, invulnerable_ticks: u32) {
        self.position = spawn;
        self.velocity = FixedVec2::ZERO;
        self.mode = PlayerMode::Ground;
        self.intent = Intent::default();
        self.vine_cooldown = 0;
        self.invulnerable_ticks = invulnerable_ticks;
        self.celebrate_ticks = 0;
    }

    /// Add points to score.
    #[inline]
    pub fn add_score(&mut self, points: u32) {
        self.score = self.score.saturating_add(points);
    }

    /// Hash player state into hasher.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_bytes(&self.id.0);
        hasher.update_vec2(self.position);
        hasher.update_vec2(self.velocity);
        hasher.update_u8(self.mode.tag());
        hasher.update_u8(self.vine().unwrap_or(u8::MAX));
        hasher.update_u8(self.lives);
        hasher.update_u32(self.score);
        hasher.update_u32(self.rescues);
        hasher.update_u32(self.invulnerable_ticks);
        hasher.update_u32(self.celebrate_ticks);
    }
}

// =============================================================================
// CROCODILES AND FRUITS
// =============================================================================

/// Crocodile behaviour.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrocodileKind {
    /// Patrols its vine end to end
    Red,
    /// Slides down its vine and drops into the water
    Blue,
}

impl CrocodileKind {
    /// Parse an admin keyword (`red`, `blue`).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "red" | "rojo" => Some(CrocodileKind::Red),
            "blue" | "azul" => Some(CrocodileKind::Blue),
            _ => None,
        }
    }
}

/// A crocodile on a vine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrocodileState {
    /// Unique crocodile ID
    pub id: u32,
    /// Behaviour
    pub kind: CrocodileKind,
    /// Vine index
    pub vine: u8,
    /// Height on the vine
    pub y: Fixed,
    /// +1 moving down, -1 moving up
    pub direction: i8,
    /// Base speed per second, before difficulty scaling
    pub speed: Fixed,
    /// Cleared when a blue crocodile reaches the water
    pub alive: bool,
}

/// A fruit hanging on a vine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FruitState {
    /// Unique fruit ID
    pub id: u32,
    /// Vine index
    pub vine: u8,
    /// Height on the vine
    pub y: Fixed,
    /// Points awarded on pickup
    pub points: u32,
}

// =============================================================================
// MATCH PHASE
// =============================================================================

/// Lifecycle of a match simulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchPhase {
    /// Waiting for enough players
    #[default]
    Waiting,
    /// Ticking
    Running,
    /// Finished, no further ticks
    Ended,
}

/// How a match finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatchOutcome {
    /// Why it ended
    pub reason: EndReason,
    /// Winning player, if any
    pub winner: Option<PlayerId>,
}

// =============================================================================
// ERRORS
// =============================================================================

/// Corruption detected in a simulation; fatal to that match only.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimulationError {
    /// Player left the playfield
    #[error("player {player} out of bounds at ({x:.2}, {y:.2})")]
    PlayerOutOfBounds {
        /// Short player id
        player: String,
        /// Column
        x: f64,
        /// Height
        y: f64,
    },

    /// Player holds more lives than possible
    #[error("player {player} has {lives} lives")]
    InvalidLives {
        /// Short player id
        player: String,
        /// Lives found
        lives: u8,
    },

    /// Entity references a vine that does not exist
    #[error("reference to unknown vine {0}")]
    UnknownVine(u8),

    /// Crocodile left its vine
    #[error("crocodile {id} left its vine at y {y:.2}")]
    CrocodileOutOfRange {
        /// Crocodile ID
        id: u32,
        /// Height found
        y: f64,
    },
}

/// Rejected entity placement (admin commands and seeding).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpawnError {
    /// Vine index out of range
    #[error("vine {vine} does not exist (valid: 0..{count})")]
    UnknownVine {
        /// Requested vine
        vine: u8,
        /// Number of vines
        count: u8,
    },

    /// Height outside the vine
    #[error("y {y:.1} is outside vine {vine} ({top:.1}..{bottom:.1})")]
    OutOfRange {
        /// Requested vine
        vine: u8,
        /// Requested height
        y: f64,
        /// Vine top
        top: f64,
        /// Vine bottom
        bottom: f64,
    },

    /// Fruit worth nothing
    #[error("fruit points must be greater than zero")]
    InvalidPoints,

    /// Fruit too close to an existing one
    #[error("fruit {existing} already hangs near y {y:.1} on vine {vine}")]
    TooClose {
        /// Requested vine
        vine: u8,
        /// Requested height
        y: f64,
        /// Conflicting fruit
        existing: u32,
    },

    /// No fruit at the given spot
    #[error("no fruit near y {y:.1} on vine {vine}")]
    FruitNotFound {
        /// Requested vine
        vine: u8,
        /// Requested height
        y: f64,
    },
}

// =============================================================================
// SIMULATION STATE
// =============================================================================

/// Complete state of one match.
///
/// Owned by the match task and mutated only between or inside ticks.
#[derive(Clone, Debug)]
pub struct SimulationState {
    /// Match identifier
    pub match_id: [u8; 16],

    /// Current tick
    pub tick: u64,

    /// Current phase
    pub phase: MatchPhase,

    /// Level, starting at 1
    pub level: u32,

    /// Crocodile speed multiplier (Q16.16, starts at 1.0)
    pub difficulty: Fixed,

    /// Admin pause
    pub paused: bool,

    /// RNG seed (for replay)
    pub rng_seed: u64,

    /// Deterministic RNG state
    pub rng: DeterministicRng,

    /// Level layout
    pub map: JungleMap,

    /// All players (BTreeMap for deterministic iteration)
    pub players: BTreeMap<PlayerId, PlayerState>,

    /// All crocodiles by id
    pub crocodiles: BTreeMap<u32, CrocodileState>,

    /// All fruits by id
    pub fruits: BTreeMap<u32, FruitState>,

    /// Next crocodile/fruit ID (monotonic counter)
    pub next_entity_id: u32,

    /// Inputs waiting for the next tick
    pub inputs: InputQueue,

    /// Set when the match ends
    pub outcome: Option<MatchOutcome>,

    /// Events generated since the last take
    pub pending_events: Vec<GameEvent>,
}

impl SimulationState {
    /// Create a match with the starting crocodiles and seeded fruits.
    pub fn new(match_id: [u8; 16], rng_seed: u64) -> Self {
        let mut state = Self::empty(match_id, rng_seed);
        crate::game::crocodile::spawn_initial_crocodiles(&mut state);
        crate::game::fruit::seed_fruits(&mut state);
        state
    }

    /// Create a match with no crocodiles or fruits.
    pub fn empty(match_id: [u8; 16], rng_seed: u64) -> Self {
        Self {
            match_id,
            tick: 0,
            phase: MatchPhase::Waiting,
            level: 1,
            difficulty: FIXED_ONE,
            paused: false,
            rng_seed,
            rng: DeterministicRng::new(rng_seed),
            map: JungleMap::new(),
            players: BTreeMap::new(),
            crocodiles: BTreeMap::new(),
            fruits: BTreeMap::new(),
            next_entity_id: 1,
            inputs: InputQueue::new(),
            outcome: None,
            pending_events: Vec::new(),
        }
    }

    /// Add a player at the spawn point. Returns false if already present.
    pub fn add_player(&mut self, id: PlayerId) -> bool {
        if self.players.contains_key(&id) {
            return false;
        }
        let player = PlayerState::new(id, self.map.spawn_point());
        self.players.insert(id, player);
        self.push_event(GameEvent::player_joined(self.tick, id));
        true
    }

    /// Remove a player and everything they queued.
    pub fn remove_player(&mut self, id: &PlayerId) -> Option<PlayerState> {
        let removed = self.players.remove(id)?;
        self.inputs.remove_player(id);
        self.push_event(GameEvent::player_left(self.tick, *id));
        Some(removed)
    }

    /// Queue an action for the next tick. Returns false if dropped.
    pub fn queue_input(&mut self, player_id: PlayerId, action: PlayerAction, seq: Option<u64>) -> bool {
        if !self.players.contains_key(&player_id) || self.phase == MatchPhase::Ended {
            return false;
        }
        self.inputs.push(QueuedInput { player_id, action, seq })
    }

    /// Move from Waiting to Running.
    pub fn start(&mut self) -> bool {
        if self.phase != MatchPhase::Waiting {
            return false;
        }
        self.phase = MatchPhase::Running;
        let players = self.players.len() as u32;
        self.push_event(GameEvent::match_started(self.tick, players));
        true
    }

    /// End the match (idempotent).
    pub fn end(&mut self, reason: EndReason, winner: Option<PlayerId>) {
        if self.phase == MatchPhase::Ended {
            return;
        }
        self.phase = MatchPhase::Ended;
        self.outcome = Some(MatchOutcome { reason, winner });
        self.push_event(GameEvent::match_ended(self.tick, winner, reason));
    }

    /// Allocate an id for a crocodile or fruit.
    pub fn allocate_entity_id(&mut self) -> u32 {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }

    /// Get a player by ID.
    pub fn get_player(&self, id: &PlayerId) -> Option<&PlayerState> {
        self.players.get(id)
    }

    /// Number of players still holding lives.
    pub fn alive_player_count(&self) -> usize {
        self.players.values().filter(|p| p.is_alive()).count()
    }

    /// Check if match has ended.
    pub fn is_ended(&self) -> bool {
        self.phase == MatchPhase::Ended
    }

    /// Check the invariants the tick relies on.
    pub fn validate(&self) -> Result<(), SimulationError> {
        let max_x = self.map.max_x();

        for player in self.players.values() {
            if player.lives > STARTING_LIVES {
                return Err(SimulationError::InvalidLives {
                    player: player.id.short(),
                    lives: player.lives,
                });
            }
            if !player.is_alive() {
                continue;
            }
            let pos = player.position;
            if pos.x < 0 || pos.x > max_x || pos.y < 0 || pos.y > WORLD_BOTTOM {
                return Err(SimulationError::PlayerOutOfBounds {
                    player: player.id.short(),
                    x: to_float(pos.x),
                    y: to_float(pos.y),
                });
            }
            if let Some(vine) = player.vine() {
                if self.map.vine(vine).is_none() {
                    return Err(SimulationError::UnknownVine(vine));
                }
            }
        }

        for croc in self.crocodiles.values() {
            let vine = self.map.vine(croc.vine).ok_or(SimulationError::UnknownVine(croc.vine))?;
            if !vine.covers(croc.y) {
                return Err(SimulationError::CrocodileOutOfRange {
                    id: croc.id,
                    y: to_float(croc.y),
                });
            }
        }

        for fruit in self.fruits.values() {
            if self.map.vine(fruit.vine).is_none() {
                return Err(SimulationError::UnknownVine(fruit.vine));
            }
        }

        Ok(())
    }

    /// Compute hash of current state for verification.
    pub fn compute_hash(&self) -> StateHash {
        compute_state_hash(self.tick, self.rng_seed, |hasher| {
            hasher.update_u32(self.level);
            hasher.update_fixed(self.difficulty);
            hasher.update_bool(self.paused);

            for player in self.players.values() {
                player.hash_into(hasher);
            }

            for croc in self.crocodiles.values() {
                hasher.update_u32(croc.id);
                hasher.update_u8(croc.kind as u8);
                hasher.update_u8(croc.vine);
                hasher.update_fixed(croc.y);
                hasher.update_u8(croc.direction as u8);
            }

            for fruit in self.fruits.values() {
                hasher.update_u32(fruit.id);
                hasher.update_u8(fruit.vine);
                hasher.update_fixed(fruit.y);
                hasher.update_u32(fruit.points);
            }
        })
    }

    /// Take pending events (consumes them).
    pub fn take_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.pending_events)
    }

    /// Push a game event.
    pub fn push_event(&mut self, event: GameEvent) {
        self.pending_events.push(event);
    }
}

// =============================================================================
// TESTS
// =============================================================================

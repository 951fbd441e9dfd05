//! Game Events
//!
//! Events raised by the simulation during a tick. The match task forwards
//! them to clients as `EVENT` messages after the tick's snapshot.

use serde::{Serialize, Deserialize};
use crate::core::fixed::Fixed;
use crate::game::state::PlayerId;

/// Priority for event ordering within a tick.
///
/// Lower value = delivered first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventPriority {
    /// Membership changes
    Roster = 0,
    /// Lives lost, eliminations
    Damage = 1,
    /// Fruit pickups
    Pickup = 2,
    /// Rescues and level changes
    Progress = 3,
    /// Match start and end
    Lifecycle = 4,
}

/// Why a match ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndReason {
    /// A player reached the required number of rescues
    Victory,
    /// Every player ran out of lives
    AllEliminated,
    /// Every player left
    Abandoned,
    /// The simulation hit an unrecoverable error
    Aborted,
    /// The server is shutting down
    Shutdown,
}

/// Game event data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameEventData {
    /// Player entered the match
    PlayerJoined {
        player_id: PlayerId,
    },

    /// Player left the match
    PlayerLeft {
        player_id: PlayerId,
    },

    /// Match moved from waiting to running
    MatchStarted {
        players: u32,
    },

    /// Player picked up a fruit
    FruitTaken {
        player_id: PlayerId,
        fruit_id: u32,
        points: u32,
        new_score: u32,
    },

    /// Player touched a crocodile
    PlayerHit {
        player_id: PlayerId,
        crocodile_id: u32,
        lives_left: u8,
    },

    /// Player fell into the water
    PlayerDrowned {
        player_id: PlayerId,
        lives_left: u8,
    },

    /// Player lost their last life
    PlayerEliminated {
        player_id: PlayerId,
    },

    /// Player reached the goal
    PlayerRescue {
        player_id: PlayerId,
        rescues: u32,
        new_score: u32,
    },

    /// Difficulty increased after a rescue
    LevelUp {
        player_id: PlayerId,
        level: u32,
        difficulty: Fixed,
    },

    /// Player won the match
    PlayerWin {
        player_id: PlayerId,
    },

    /// Match ended
    MatchEnded {
        winner_id: Option<PlayerId>,
        reason: EndReason,
        duration_ticks: u64,
    },
}

/// A game event with timing and priority.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEvent {
    /// Tick when event occurred
    pub tick: u64,

    /// Delivery priority
    pub priority: EventPriority,

    /// Event data
    pub data: GameEventData,
}

impl GameEvent {
    /// Create a new event.
    pub fn new(tick: u64, priority: EventPriority, data: GameEventData) -> Self {
        Self { tick, priority, data }
    }

    /// Player the event is about, if any.
    pub fn player_id(&self) -> Option<PlayerId> {
        match &self.data {
            GameEventData::PlayerJoined { player_id }
            | GameEventData::PlayerLeft { player_id }
            | GameEventData::FruitTaken { player_id, .. }
            | GameEventData::PlayerHit { player_id, .. }
            | GameEventData::PlayerDrowned { player_id, .. }
            | GameEventData::PlayerEliminated { player_id }
            | GameEventData::PlayerRescue { player_id, .. }
            | GameEventData::LevelUp { player_id, .. }
            | GameEventData::PlayerWin { player_id } => Some(*player_id),
            GameEventData::MatchEnded { winner_id, .. } => *winner_id,
            GameEventData::MatchStarted { .. } => None,
        }
    }

    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match &self.data {
            GameEventData::PlayerJoined { .. } => "PLAYER_JOINED",
            GameEventData::PlayerLeft { .. } => "PLAYER_LEFT",
            GameEventData::MatchStarted { .. } => "MATCH_STARTED",
            GameEventData::FruitTaken { .. } => "FRUIT_TAKEN",
            GameEventData::PlayerHit { .. } => "PLAYER_HIT",
            GameEventData::PlayerDrowned { .. } => "PLAYER_DROWNED",
            GameEventData::PlayerEliminated { .. } => "PLAYER_ELIMINATED",
            GameEventData::PlayerRescue { .. } => "PLAYER_RESCUE",
            GameEventData::LevelUp { .. } => "LEVEL_UP",
            GameEventData::PlayerWin { .. } => "PLAYER_WIN",
            GameEventData::MatchEnded { .. } => "MATCH_ENDED",
        }
    }

    /// Create player joined event.
    pub fn player_joined(tick: u64, player_id: PlayerId) -> Self {
        Self::new(tick, EventPriority::Roster, GameEventData::PlayerJoined { player_id })
    }

    /// Create player left event.
    pub fn player_left(tick: u64, player_id: PlayerId) -> Self {
        Self::new(tick, EventPriority::Roster, GameEventData::PlayerLeft { player_id })
    }

    /// Create match started event.
    pub fn match_started(tick: u64, players: u32) -> Self {
        Self::new(tick, EventPriority::Lifecycle, GameEventData::MatchStarted { players })
    }

    /// Create fruit taken event.
    pub fn fruit_taken(tick: u64, player_id: PlayerId, fruit_id: u32, points: u32, new_score: u32) -> Self {
        Self::new(
            tick,
            EventPriority::Pickup,
            GameEventData::FruitTaken { player_id, fruit_id, points, new_score },
        )
    }

    /// Create player hit event.
    pub fn player_hit(tick: u64, player_id: PlayerId, crocodile_id: u32, lives_left: u8) -> Self {
        Self::new(
            tick,
            EventPriority::Damage,
            GameEventData::PlayerHit { player_id, crocodile_id, lives_left },
        )
    }

    /// Create player drowned event.
    pub fn player_drowned(tick: u64, player_id: PlayerId, lives_left: u8) -> Self {
        Self::new(tick, EventPriority::Damage, GameEventData::PlayerDrowned { player_id, lives_left })
    }

    /// Create player eliminated event.
    pub fn player_eliminated(tick: u64, player_id: PlayerId) -> Self {
        Self::new(tick, EventPriority::Damage, GameEventData::PlayerEliminated { player_id })
    }

    /// Create rescue event.
    pub fn player_rescue(tick: u64, player_id: PlayerId, rescues: u32, new_score: u32) -> Self {
        Self::new(
            tick,
            EventPriority::Progress,
            GameEventData::PlayerRescue { player_id, rescues, new_score },
        )
    }

    /// Create level up event.
    pub fn level_up(tick: u64, player_id: PlayerId, level: u32, difficulty: Fixed) -> Self {
        Self::new(
            tick,
            EventPriority::Progress,
            GameEventData::LevelUp { player_id, level, difficulty },
        )
    }

    /// Create player win event.
    pub fn player_win(tick: u64, player_id: PlayerId) -> Self {
        Self::new(tick, EventPriority::Progress, GameEventData::PlayerWin { player_id })
    }

    /// Create match ended event.
    pub fn match_ended(tick: u64, winner_id: Option<PlayerId>, reason: EndReason) -> Self {
        Self::new(
            tick,
            EventPriority::Lifecycle,
            GameEventData::MatchEnded { winner_id, reason, duration_ticks: tick },
        )
    }
}

impl PartialOrd for GameEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GameEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // tick, then priority, then player
        self.tick
            .cmp(&other.tick)
            .then(self.priority.cmp(&other.priority))
            .then(self.player_id().cmp(&other.player_id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_ordering() {
        let id1 = PlayerId::new([1; 16]);
        let id2 = PlayerId::new([2; 16]);

        let hit = GameEvent::player_hit(10, id2, 0, 2);
        let pickup = GameEvent::fruit_taken(10, id1, 3, 50, 50);
        let other_hit = GameEvent::player_drowned(10, id1, 1);

        // Damage before pickups on the same tick
        assert!(hit < pickup);
        // Same priority falls back to player order
        assert!(other_hit < hit);
        // Earlier ticks first
        assert!(GameEvent::match_started(9, 2) < other_hit);
    }

    #[test]
    fn test_event_names_and_players() {
        let id = PlayerId::new([4; 16]);

        let event = GameEvent::player_rescue(20, id, 1, 100);
        assert_eq!(event.name(), "PLAYER_RESCUE");
        assert_eq!(event.player_id(), Some(id));

        let event = GameEvent::match_ended(40, None, EndReason::Abandoned);
        assert_eq!(event.name(), "MATCH_ENDED");
        assert_eq!(event.player_id(), None);
    }
}

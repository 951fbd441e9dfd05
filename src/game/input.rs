//! Player Actions and Input Queueing
//!
//! Clients send discrete actions (`LEFT`, `JUMP`, ...). The match task
//! queues them in receipt order and the tick folds them into each player's
//! [`Intent`], which the physics step reads.
//!
//! Movement actions are held for a short window so that clients which only
//! report key presses (no key release) still move smoothly; `STOP` ends the
//! window early.

use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;

use crate::game::state::PlayerId;

// =============================================================================
// ACTIONS
// =============================================================================

/// A single client action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerAction {
    /// Climb up / aim up
    #[serde(alias = "MOVE_UP", alias = "up")]
    Up,
    /// Climb down
    #[serde(alias = "MOVE_DOWN", alias = "down")]
    Down,
    /// Walk or switch vine left
    #[serde(alias = "MOVE_LEFT", alias = "left")]
    Left,
    /// Walk or switch vine right
    #[serde(alias = "MOVE_RIGHT", alias = "right")]
    Right,
    /// Jump from ground or vine
    #[serde(alias = "jump")]
    Jump,
    /// Grab the nearest vine
    #[serde(alias = "grab")]
    Grab,
    /// Let go of the vine
    #[serde(alias = "release")]
    Release,
    /// Cancel held movement
    #[serde(alias = "NONE", alias = "stop")]
    Stop,
}

impl PlayerAction {
    /// Wire name of the action.
    pub fn as_str(self) -> &'static str {
        match self {
            PlayerAction::Up => "UP",
            PlayerAction::Down => "DOWN",
            PlayerAction::Left => "LEFT",
            PlayerAction::Right => "RIGHT",
            PlayerAction::Jump => "JUMP",
            PlayerAction::Grab => "GRAB",
            PlayerAction::Release => "RELEASE",
            PlayerAction::Stop => "STOP",
        }
    }
}

// =============================================================================
// INTENT
// =============================================================================

/// What a player is currently trying to do.
///
/// Movement directions persist for `hold_ticks`; jump and release are
/// consumed by the next physics step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Intent {
    /// -1 left, 0 none, +1 right
    pub horizontal: i8,
    /// -1 up, 0 none, +1 down
    pub vertical: i8,
    /// Ticks left before held movement lapses
    pub hold_ticks: u32,
    /// Ticks left in which a vine grab is attempted
    pub grab_ticks: u32,
    /// One-shot action flags (packed bits)
    pub flags: u8,
}

impl Intent {
    /// Jump flag bit
    pub const FLAG_JUMP: u8 = 0x01;

    /// Release flag bit
    pub const FLAG_RELEASE: u8 = 0x02;

    /// Fold an action into the intent.
    pub fn apply(&mut self, action: PlayerAction, hold_ticks: u32) {
        match action {
            PlayerAction::Left => self.hold_horizontal(-1, hold_ticks),
            PlayerAction::Right => self.hold_horizontal(1, hold_ticks),
            PlayerAction::Up => self.hold_vertical(-1, hold_ticks),
            PlayerAction::Down => self.hold_vertical(1, hold_ticks),
            PlayerAction::Jump => self.flags |= Self::FLAG_JUMP,
            PlayerAction::Release => {
                self.flags |= Self::FLAG_RELEASE;
                self.grab_ticks = 0;
            }
            PlayerAction::Grab => self.grab_ticks = hold_ticks,
            PlayerAction::Stop => {
                self.horizontal = 0;
                self.vertical = 0;
                self.hold_ticks = 0;
            }
        }
    }

    fn hold_horizontal(&mut self, direction: i8, hold_ticks: u32) {
        self.horizontal = direction;
        self.hold_ticks = hold_ticks;
    }

    fn hold_vertical(&mut self, direction: i8, hold_ticks: u32) {
        self.vertical = direction;
        self.hold_ticks = hold_ticks;
    }

    /// Check if jump was requested.
    #[inline]
    pub fn jump_pressed(&self) -> bool {
        self.flags & Self::FLAG_JUMP != 0
    }

    /// Check if release was requested.
    #[inline]
    pub fn release_pressed(&self) -> bool {
        self.flags & Self::FLAG_RELEASE != 0
    }

    /// Whether the player is reaching for a vine.
    #[inline]
    pub fn wants_grab(&self) -> bool {
        self.grab_ticks > 0 || self.vertical < 0
    }

    /// Consume one-shot flags and age held movement.
    pub fn end_tick(&mut self) {
        self.flags = 0;
        self.grab_ticks = self.grab_ticks.saturating_sub(1);
        if self.hold_ticks > 0 {
            self.hold_ticks -= 1;
            if self.hold_ticks == 0 {
                self.horizontal = 0;
                self.vertical = 0;
            }
        }
    }
}

// =============================================================================
// INPUT QUEUE
// =============================================================================

/// An action waiting for the next tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueuedInput {
    /// Player that sent it
    pub player_id: PlayerId,
    /// The action
    pub action: PlayerAction,
    /// Optional client sequence number
    pub seq: Option<u64>,
}

/// Inputs buffered between ticks, in receipt order.
#[derive(Clone, Debug, Default)]
pub struct InputQueue {
    entries: Vec<QueuedInput>,
    last_seq: BTreeMap<PlayerId, u64>,
}

impl InputQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an input. Returns false for a duplicate or stale sequence number.
    pub fn push(&mut self, input: QueuedInput) -> bool {
        if let Some(seq) = input.seq {
            match self.last_seq.get(&input.player_id) {
                Some(last) if seq <= *last => return false,
                _ => {
                    self.last_seq.insert(input.player_id, seq);
                }
            }
        }
        self.entries.push(input);
        true
    }

    /// Take every queued input in receipt order.
    pub fn drain(&mut self) -> Vec<QueuedInput> {
        std::mem::take(&mut self.entries)
    }

    /// Drop everything a departed player queued.
    pub fn remove_player(&mut self, player_id: &PlayerId) {
        self.entries.retain(|i| i.player_id != *player_id);
        self.last_seq.remove(player_id);
    }

    /// Discard queued inputs but keep sequence tracking.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of queued inputs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(byte: u8, action: PlayerAction, seq: Option<u64>) -> QueuedInput {
        QueuedInput { player_id: PlayerId::new([byte; 16]), action, seq }
    }

    #[test]
    fn test_action_wire_names() {
        let action: PlayerAction = serde_json::from_str("\"MOVE_UP\"").unwrap();
        assert_eq!(action, PlayerAction::Up);

        let action: PlayerAction = serde_json::from_str("\"JUMP\"").unwrap();
        assert_eq!(action, PlayerAction::Jump);

        let action: PlayerAction = serde_json::from_str("\"NONE\"").unwrap();
        assert_eq!(action, PlayerAction::Stop);

        assert!(serde_json::from_str::<PlayerAction>("\"FLY\"").is_err());
        assert_eq!(serde_json::to_string(&PlayerAction::Release).unwrap(), "\"RELEASE\"");
        assert_eq!(PlayerAction::Left.as_str(), "LEFT");
    }

    #[test]
    fn test_intent_hold_window() {
        let mut intent = Intent::default();
        intent.apply(PlayerAction::Right, 3);
        assert_eq!(intent.horizontal, 1);

        intent.end_tick();
        intent.end_tick();
        assert_eq!(intent.horizontal, 1);

        intent.end_tick();
        assert_eq!(intent.horizontal, 0);
        assert_eq!(intent.hold_ticks, 0);
    }

    #[test]
    fn test_intent_one_shot_flags() {
        let mut intent = Intent::default();
        intent.apply(PlayerAction::Jump, 3);
        intent.apply(PlayerAction::Release, 3);
        assert!(intent.jump_pressed());
        assert!(intent.release_pressed());

        intent.end_tick();
        assert!(!intent.jump_pressed());
        assert!(!intent.release_pressed());
    }

    #[test]
    fn test_intent_stop_and_grab() {
        let mut intent = Intent::default();
        intent.apply(PlayerAction::Left, 5);
        intent.apply(PlayerAction::Down, 5);
        intent.apply(PlayerAction::Stop, 5);
        assert_eq!((intent.horizontal, intent.vertical), (0, 0));

        intent.apply(PlayerAction::Grab, 2);
        assert!(intent.wants_grab());
        intent.end_tick();
        intent.end_tick();
        assert!(!intent.wants_grab());

        intent.apply(PlayerAction::Up, 2);
        assert!(intent.wants_grab());
    }

    #[test]
    fn test_queue_preserves_receipt_order() {
        let mut queue = InputQueue::new();
        queue.push(queued(2, PlayerAction::Left, None));
        queue.push(queued(1, PlayerAction::Jump, None));
        queue.push(queued(2, PlayerAction::Stop, None));

        let drained = queue.drain();
        let actions: Vec<_> = drained.iter().map(|i| i.action).collect();
        assert_eq!(actions, vec![PlayerAction::Left, PlayerAction::Jump, PlayerAction::Stop]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_rejects_stale_sequence() {
        let mut queue = InputQueue::new();
        assert!(queue.push(queued(1, PlayerAction::Left, Some(5))));
        assert!(!queue.push(queued(1, PlayerAction::Right, Some(5))));
        assert!(!queue.push(queued(1, PlayerAction::Right, Some(4))));
        assert!(queue.push(queued(1, PlayerAction::Right, Some(6))));
        // Sequences are tracked per player
        assert!(queue.push(queued(2, PlayerAction::Up, Some(1))));
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_queue_remove_player() {
        let mut queue = InputQueue::new();
        queue.push(queued(1, PlayerAction::Left, Some(1)));
        queue.push(queued(2, PlayerAction::Left, None));
        queue.remove_player(&PlayerId::new([1; 16]));

        assert_eq!(queue.len(), 1);
        // Sequence history is forgotten with the player
        assert!(queue.push(queued(1, PlayerAction::Left, Some(1))));
    }
}

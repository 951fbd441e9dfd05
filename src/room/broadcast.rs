//! State Broadcaster
//!
//! Sends each participant the state after every tick: a full `STATE` frame
//! when it has nothing usable acknowledged, otherwise a `DELTA` against the
//! tick it last acknowledged. Events follow the state frame in tick order.
//!
//! A participant whose queue is closed, or full for too many frames in a
//! row, is dropped from the broadcast and reported back to the caller.
//! Nobody else is affected.

use std::collections::{BTreeMap, VecDeque};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::game::events::{GameEvent, GameEventData};
use crate::game::state::{PlayerId, SimulationState};
use crate::network::protocol::{ClientRole, ServerMessage, StateSnapshot};
use crate::network::session::SessionId;
use crate::room::delta::diff_snapshots;

/// Fan-out tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastConfig {
    /// Ticks between forced full snapshots
    pub full_snapshot_interval: u64,
    /// Snapshots kept as delta bases
    pub history_window: usize,
    /// Consecutive frames a full queue may miss before the session is dropped
    pub max_lagged_frames: u32,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            full_snapshot_interval: 100,
            history_window: 64,
            max_lagged_frames: 40,
        }
    }
}

#[derive(Debug)]
struct Recipient {
    sender: mpsc::Sender<ServerMessage>,
    role: ClientRole,
    acked_tick: Option<u64>,
    last_full_tick: Option<u64>,
    lagged: u32,
}

enum Delivery {
    Sent,
    Skipped,
    Dropped,
}

/// Per-match snapshot and event fan-out.
#[derive(Debug)]
pub struct StateBroadcaster {
    config: BroadcastConfig,
    recipients: BTreeMap<SessionId, Recipient>,
    history: VecDeque<StateSnapshot>,
}

impl StateBroadcaster {
    /// Create an empty broadcaster.
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            config,
            recipients: BTreeMap::new(),
            history: VecDeque::new(),
        }
    }

    /// Add or replace a recipient. It gets a full snapshot next.
    pub fn add(&mut self, session: SessionId, role: ClientRole, sender: mpsc::Sender<ServerMessage>) {
        self.recipients.insert(session, Recipient {
            sender,
            role,
            acked_tick: None,
            last_full_tick: None,
            lagged: 0,
        });
    }

    /// Remove a recipient.
    pub fn remove(&mut self, session: &SessionId) -> bool {
        self.recipients.remove(session).is_some()
    }

    /// Whether a session receives this match's state.
    pub fn contains(&self, session: &SessionId) -> bool {
        self.recipients.contains_key(session)
    }

    /// Record the newest tick a session has applied.
    ///
    /// Acks ahead of the latest snapshot or behind an earlier ack are ignored.
    pub fn acknowledge(&mut self, session: &SessionId, tick: u64) -> bool {
        let latest = match self.history.back() {
            Some(snapshot) => snapshot.tick,
            None => return false,
        };
        match self.recipients.get_mut(session) {
            Some(recipient) if tick <= latest && recipient.acked_tick.map_or(true, |t| tick >= t) => {
                recipient.acked_tick = Some(tick);
                true
            }
            _ => false,
        }
    }

    /// Number of recipients.
    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    /// Whether there are no recipients.
    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }

    /// Number of spectating recipients.
    pub fn spectator_count(&self) -> usize {
        self.recipients.values().filter(|r| r.role == ClientRole::Spectator).count()
    }

    /// Send one message to every recipient, returning those dropped.
    pub fn send_all(&mut self, message: &ServerMessage) -> Vec<SessionId> {
        let ids: Vec<SessionId> = self.recipients.keys().copied().collect();
        ids.into_iter()
            .filter(|id| matches!(self.deliver(id, message.clone()), Delivery::Dropped))
            .collect()
    }

    /// Send the state after a tick plus that tick's events.
    ///
    /// Returns the sessions dropped as unreachable. `MATCH_ENDED` is left to
    /// the `MATCH_END` message and not forwarded as an event.
    pub fn broadcast(
        &mut self,
        state: &SimulationState,
        names: &BTreeMap<PlayerId, String>,
        events: &[GameEvent],
    ) -> Vec<SessionId> {
        let snapshot = StateSnapshot::capture(state, names);
        self.record(snapshot.clone());

        let event_messages: Vec<ServerMessage> = events
            .iter()
            .filter(|e| !matches!(e.data, GameEventData::MatchEnded { .. }))
            .map(|e| ServerMessage::event(e, names))
            .collect();

        let ids: Vec<SessionId> = self.recipients.keys().copied().collect();
        let mut dropped = Vec::new();

        'recipients: for id in ids {
            let frame = match self.recipients.get(&id) {
                Some(recipient) => self.frame_for(recipient, &snapshot),
                None => continue,
            };

            if let Some((message, full)) = frame {
                match self.deliver(&id, message) {
                    Delivery::Sent if full => {
                        if let Some(recipient) = self.recipients.get_mut(&id) {
                            recipient.last_full_tick = Some(snapshot.tick);
                        }
                    }
                    Delivery::Sent | Delivery::Skipped => {}
                    Delivery::Dropped => {
                        dropped.push(id);
                        continue;
                    }
                }
            }

            for message in &event_messages {
                if let Delivery::Dropped = self.deliver(&id, message.clone()) {
                    dropped.push(id);
                    continue 'recipients;
                }
            }
        }

        dropped
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    /// Keep `snapshot` as a delta base.
    ///
    /// Several snapshots can share a tick while a match waits or is paused.
    /// A same-tick snapshot with different content replaces the old one and
    /// voids acks pointing at it.
    fn record(&mut self, snapshot: StateSnapshot) {
        if let Some(last) = self.history.back_mut() {
            if last.tick == snapshot.tick {
                if *last != snapshot {
                    let tick = snapshot.tick;
                    *last = snapshot;
                    for recipient in self.recipients.values_mut() {
                        if recipient.acked_tick == Some(tick) {
                            recipient.acked_tick = None;
                        }
                    }
                }
                return;
            }
        }

        self.history.push_back(snapshot);
        while self.history.len() > self.config.history_window.max(1) {
            self.history.pop_front();
        }
    }

    /// The state frame for one recipient, and whether it is a full snapshot.
    fn frame_for(&self, recipient: &Recipient, current: &StateSnapshot) -> Option<(ServerMessage, bool)> {
        let full = || Some((ServerMessage::State { data: current.clone() }, true));

        let (acked, last_full) = match (recipient.acked_tick, recipient.last_full_tick) {
            (Some(acked), Some(last_full)) => (acked, last_full),
            _ => return full(),
        };
        if current.tick.saturating_sub(last_full) >= self.config.full_snapshot_interval {
            return full();
        }
        let base = match self.history.iter().find(|s| s.tick == acked) {
            Some(base) => base,
            None => return full(),
        };

        diff_snapshots(base, current).map(|delta| (ServerMessage::Delta { data: delta }, false))
    }

    fn deliver(&mut self, session: &SessionId, message: ServerMessage) -> Delivery {
        let recipient = match self.recipients.get_mut(session) {
            Some(recipient) => recipient,
            None => return Delivery::Dropped,
        };

        match recipient.sender.try_send(message) {
            Ok(()) => {
                recipient.lagged = 0;
                Delivery::Sent
            }
            Err(TrySendError::Full(_)) => {
                recipient.lagged += 1;
                if recipient.lagged > self.config.max_lagged_frames {
                    warn!(session = %session, frames = recipient.lagged, "Outbound queue stalled, dropping");
                    self.recipients.remove(session);
                    Delivery::Dropped
                } else {
                    Delivery::Skipped
                }
            }
            Err(TrySendError::Closed(_)) => {
                debug!(session = %session, "Outbound queue closed");
                self.recipients.remove(session);
                Delivery::Dropped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::EndReason;
    use crate::game::state::SimulationState;

    fn recipient(broadcaster: &mut StateBroadcaster, capacity: usize) -> (SessionId, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        let id = SessionId::new();
        broadcaster.add(id, ClientRole::Player, tx);
        (id, rx)
    }

    fn running_state() -> SimulationState {
        let mut state = SimulationState::new([3; 16], 9);
        state.add_player(PlayerId([1; 16]));
        state.start();
        state
    }

    #[test]
    fn test_first_frame_is_full_snapshot() {
        let mut broadcaster = StateBroadcaster::new(BroadcastConfig::default());
        let (_, mut rx) = recipient(&mut broadcaster, 8);
        let state = running_state();

        let dropped = broadcaster.broadcast(&state, &BTreeMap::new(), &[]);
        assert!(dropped.is_empty());

        match rx.try_recv().unwrap() {
            ServerMessage::State { data } => {
                assert_eq!(data.tick, state.tick);
                assert_eq!(data.players.len(), 1);
            }
            other => panic!("expected STATE, got {:?}", other),
        }
    }

    #[test]
    fn test_acked_client_gets_delta() {
        let mut broadcaster = StateBroadcaster::new(BroadcastConfig::default());
        let (id, mut rx) = recipient(&mut broadcaster, 8);
        let mut state = running_state();

        broadcaster.broadcast(&state, &BTreeMap::new(), &[]);
        assert!(matches!(rx.try_recv().unwrap(), ServerMessage::State { .. }));
        assert!(broadcaster.acknowledge(&id, state.tick));

        state.tick += 1;
        broadcaster.broadcast(&state, &BTreeMap::new(), &[]);
        match rx.try_recv().unwrap() {
            ServerMessage::Delta { data } => {
                assert_eq!(data.base_tick, state.tick - 1);
                assert_eq!(data.tick, state.tick);
            }
            other => panic!("expected DELTA, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_base_falls_back_to_full() {
        let config = BroadcastConfig { history_window: 2, ..BroadcastConfig::default() };
        let mut broadcaster = StateBroadcaster::new(config);
        let (id, mut rx) = recipient(&mut broadcaster, 16);
        let mut state = running_state();

        broadcaster.broadcast(&state, &BTreeMap::new(), &[]);
        broadcaster.acknowledge(&id, state.tick);
        // Base tick falls out of the two-entry history
        for _ in 0..3 {
            state.tick += 1;
            broadcaster.broadcast(&state, &BTreeMap::new(), &[]);
        }

        let mut last = None;
        while let Ok(message) = rx.try_recv() {
            last = Some(message);
        }
        assert!(matches!(last, Some(ServerMessage::State { .. })));
    }

    #[test]
    fn test_periodic_full_snapshot() {
        let config = BroadcastConfig { full_snapshot_interval: 3, ..BroadcastConfig::default() };
        let mut broadcaster = StateBroadcaster::new(config);
        let (id, mut rx) = recipient(&mut broadcaster, 16);
        let mut state = running_state();

        let mut kinds = Vec::new();
        for _ in 0..4 {
            broadcaster.broadcast(&state, &BTreeMap::new(), &[]);
            broadcaster.acknowledge(&id, state.tick);
            kinds.push(match rx.try_recv().unwrap() {
                ServerMessage::State { .. } => "full",
                ServerMessage::Delta { .. } => "delta",
                _ => "other",
            });
            state.tick += 1;
        }
        assert_eq!(kinds, vec!["full", "delta", "delta", "full"]);
    }

    #[test]
    fn test_ack_ahead_of_history_ignored() {
        let mut broadcaster = StateBroadcaster::new(BroadcastConfig::default());
        let (id, _rx) = recipient(&mut broadcaster, 8);

        assert!(!broadcaster.acknowledge(&id, 0));

        let state = running_state();
        broadcaster.broadcast(&state, &BTreeMap::new(), &[]);
        assert!(!broadcaster.acknowledge(&id, state.tick + 10));
        assert!(broadcaster.acknowledge(&id, state.tick));
    }

    #[test]
    fn test_closed_recipient_dropped_silently() {
        let mut broadcaster = StateBroadcaster::new(BroadcastConfig::default());
        let (gone, rx_gone) = recipient(&mut broadcaster, 8);
        let (stay, mut rx_stay) = recipient(&mut broadcaster, 8);
        drop(rx_gone);

        let state = running_state();
        let dropped = broadcaster.broadcast(&state, &BTreeMap::new(), &[]);

        assert_eq!(dropped, vec![gone]);
        assert!(!broadcaster.contains(&gone));
        assert!(broadcaster.contains(&stay));
        assert!(rx_stay.try_recv().is_ok());
    }

    #[test]
    fn test_stalled_recipient_dropped_after_limit() {
        let config = BroadcastConfig { max_lagged_frames: 2, ..BroadcastConfig::default() };
        let mut broadcaster = StateBroadcaster::new(config);
        let (id, _rx) = recipient(&mut broadcaster, 1);
        let mut state = running_state();

        // First frame fills the queue, then two misses are tolerated
        for _ in 0..3 {
            assert!(broadcaster.broadcast(&state, &BTreeMap::new(), &[]).is_empty());
            state.tick += 1;
        }
        assert_eq!(broadcaster.broadcast(&state, &BTreeMap::new(), &[]), vec![id]);
        assert!(broadcaster.is_empty());
    }

    #[test]
    fn test_events_follow_state_without_match_ended() {
        let mut broadcaster = StateBroadcaster::new(BroadcastConfig::default());
        let (_, mut rx) = recipient(&mut broadcaster, 8);
        let state = running_state();
        let player = PlayerId([1; 16]);

        let events = vec![
            GameEvent::player_drowned(state.tick, player, 2),
            GameEvent::match_ended(state.tick, None, EndReason::AllEliminated),
        ];
        broadcaster.broadcast(&state, &BTreeMap::new(), &events);

        assert!(matches!(rx.try_recv().unwrap(), ServerMessage::State { .. }));
        match rx.try_recv().unwrap() {
            ServerMessage::Event { name, .. } => assert_eq!(name, "PLAYER_DROWNED"),
            other => panic!("expected EVENT, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_same_tick_change_voids_ack() {
        let mut broadcaster = StateBroadcaster::new(BroadcastConfig::default());
        let (id, mut rx) = recipient(&mut broadcaster, 8);
        let mut state = running_state();

        broadcaster.broadcast(&state, &BTreeMap::new(), &[]);
        broadcaster.acknowledge(&id, state.tick);
        rx.try_recv().unwrap();

        // Pause changes the state without advancing the tick
        state.paused = true;
        broadcaster.broadcast(&state, &BTreeMap::new(), &[]);
        match rx.try_recv().unwrap() {
            ServerMessage::State { data } => assert!(data.paused),
            other => panic!("expected STATE, got {:?}", other),
        }
    }

    #[test]
    fn test_spectator_count() {
        let mut broadcaster = StateBroadcaster::new(BroadcastConfig::default());
        let (tx, _rx) = mpsc::channel(4);
        broadcaster.add(SessionId::new(), ClientRole::Spectator, tx.clone());
        broadcaster.add(SessionId::new(), ClientRole::Player, tx);
        assert_eq!(broadcaster.len(), 2);
        assert_eq!(broadcaster.spectator_count(), 1);
    }
}

//! Match Task
//!
//! Each match runs in its own task, which owns the simulation outright.
//! Everything else talks to it through channels:
//!
//! - control messages (join, leave, ack, operator commands, stop)
//! - player inputs, bounded
//! - a watch channel publishing a [`MatchStatus`] after every tick
//! - shared [`MatchTelemetry`] counters
//!
//! Per tick the task drains control then inputs, advances the simulation,
//! and hands the result to the [`StateBroadcaster`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::core::fixed::{to_fixed, to_float};
use crate::game::crocodile::spawn_crocodile;
use crate::game::events::EndReason;
use crate::game::fruit::{add_fruit, remove_fruit};
use crate::game::state::{MatchPhase, PlayerId, SimulationState};
use crate::game::tick::{tick, MatchConfig, TickResult};
use crate::network::protocol::{ClientRole, MatchEndInfo, ServerMessage};
use crate::network::session::SessionId;
use crate::room::broadcast::StateBroadcaster;
use crate::room::telemetry::MatchTelemetry;
use crate::room::{InputCommand, MatchCommand, MatchControl, MatchId, MatchStatus, RoomConfig, RoomNotice};

/// Capacity of a match's input queue.
pub const INPUT_QUEUE_CAPACITY: usize = 1024;

/// Channels for talking to a running match task.
#[derive(Debug)]
pub struct MatchHandle {
    /// Control messages
    pub control: mpsc::UnboundedSender<MatchControl>,
    /// Player inputs
    pub inputs: mpsc::Sender<InputCommand>,
    /// Latest status
    pub status: watch::Receiver<MatchStatus>,
    /// Live counters
    pub telemetry: Arc<MatchTelemetry>,
    /// The task itself
    pub task: JoinHandle<()>,
}

impl MatchHandle {
    /// Whether the match can still take participants.
    pub fn is_live(&self) -> bool {
        self.status.borrow().phase != MatchPhase::Ended && !self.task.is_finished()
    }
}

/// Owner of one match simulation.
pub struct MatchActor {
    id: MatchId,
    state: SimulationState,
    config: MatchConfig,
    min_players: usize,
    had_players: bool,
    names: BTreeMap<PlayerId, String>,
    broadcaster: StateBroadcaster,
    control_rx: mpsc::UnboundedReceiver<MatchControl>,
    input_rx: mpsc::Receiver<InputCommand>,
    status_tx: watch::Sender<MatchStatus>,
    telemetry: Arc<MatchTelemetry>,
    notices: mpsc::UnboundedSender<RoomNotice>,
}

/// Scheduled gap between ticks.
fn tick_interval(tick_rate: u32) -> Duration {
    Duration::from_micros(1_000_000 / tick_rate.max(1) as u64)
}

impl MatchActor {
    /// Start a task for `state` and return its handle.
    pub fn spawn(
        id: MatchId,
        state: SimulationState,
        config: &RoomConfig,
        notices: mpsc::UnboundedSender<RoomNotice>,
    ) -> MatchHandle {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE_CAPACITY);
        let telemetry = Arc::new(MatchTelemetry::new(tick_interval(config.match_config.tick_rate)));
        telemetry.record_crocodiles_created(state.crocodiles.len());
        let (status_tx, status_rx) = watch::channel(MatchStatus {
            phase: state.phase,
            tick: state.tick,
            telemetry: telemetry.snapshot(),
            ..MatchStatus::default()
        });

        let actor = Self {
            id,
            state,
            config: config.match_config.clone(),
            min_players: config.min_players_to_start.max(1),
            had_players: false,
            names: BTreeMap::new(),
            broadcaster: StateBroadcaster::new(config.broadcast.clone()),
            control_rx,
            input_rx,
            status_tx,
            telemetry: telemetry.clone(),
            notices,
        };

        MatchHandle {
            control: control_tx,
            inputs: input_tx,
            status: status_rx,
            telemetry,
            task: tokio::spawn(actor.run()),
        }
    }

    /// Tick until the match ends.
    #[instrument(skip(self), fields(match_id = %self.id))]
    pub async fn run(mut self) {
        let mut ticker = interval(tick_interval(self.config.tick_rate));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut previous_start: Option<Instant> = None;

        info!(tick_rate = self.config.tick_rate, "Match task started");

        loop {
            ticker.tick().await;
            let started = Instant::now();
            let since_previous = previous_start.map(|p| started.duration_since(p));
            previous_start = Some(started);

            if let Some(reason) = self.drain_control() {
                self.state.end(reason, None);
            }
            self.drain_inputs();
            self.maybe_start();

            let result = match tick(&mut self.state, &self.config) {
                Ok(result) => result,
                Err(e) => {
                    error!(tick = self.state.tick, error = %e, "Simulation corrupted, aborting match");
                    self.state.end(EndReason::Aborted, None);
                    TickResult::default()
                }
            };
            if !result.crocodiles_removed.is_empty() {
                self.telemetry.record_crocodiles_removed(result.crocodiles_removed.len());
            }

            #[cfg(feature = "debug-tracing")]
            debug!(tick = self.state.tick, hash = %hex::encode(self.state.compute_hash()), "State hash");

            // Roster changes and stops happen between ticks
            let mut events = self.state.take_events();
            events.extend(result.events);
            events.sort();

            let unreachable = self.broadcaster.broadcast(&self.state, &self.names, &events);
            for session in unreachable {
                self.drop_unreachable(session);
            }

            self.telemetry.record_tick(started.elapsed(), since_previous);
            self.publish_status();

            if result.match_ended || self.state.is_ended() {
                self.finish();
                break;
            }
        }
    }

    /// Apply pending control messages. Returns a stop reason if asked to stop.
    fn drain_control(&mut self) -> Option<EndReason> {
        loop {
            match self.control_rx.try_recv() {
                Ok(MatchControl::Join { session, name, role, sender }) => {
                    if role == ClientRole::Player {
                        let player = session.player_id();
                        self.state.add_player(player);
                        self.names.insert(player, name);
                        self.had_players = true;
                    }
                    self.broadcaster.add(session, role, sender);
                    debug!(session = %session, ?role, "Joined");
                }
                Ok(MatchControl::Leave { session }) => {
                    self.remove_participant(&session);
                    debug!(session = %session, "Left");
                }
                Ok(MatchControl::Ack { session, tick }) => {
                    self.broadcaster.acknowledge(&session, tick);
                }
                Ok(MatchControl::Admin { command, reply }) => {
                    let outcome = self.apply_admin(command);
                    let _ = reply.send(outcome);
                }
                Ok(MatchControl::Stop { reason }) => return Some(reason),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => return Some(EndReason::Abandoned),
            }
        }
    }

    /// Queue pending inputs in the order they arrived.
    fn drain_inputs(&mut self) {
        while let Ok(input) = self.input_rx.try_recv() {
            if !self.state.queue_input(input.session.player_id(), input.action, input.seq) {
                debug!(session = %input.session, action = ?input.action, "Input dropped");
            }
        }
    }

    fn maybe_start(&mut self) {
        if self.state.phase != MatchPhase::Waiting {
            return;
        }
        if self.state.players.len() >= self.min_players {
            self.state.start();
            info!(players = self.state.players.len(), "Match started");
        } else if self.had_players && self.state.players.is_empty() {
            // Everyone left before the start
            self.state.end(EndReason::Abandoned, None);
        }
    }

    fn remove_participant(&mut self, session: &SessionId) {
        let player = session.player_id();
        self.state.remove_player(&player);
        self.names.remove(&player);
        self.broadcaster.remove(session);
    }

    fn drop_unreachable(&mut self, session: SessionId) {
        warn!(session = %session, "Participant unreachable, removing");
        self.remove_participant(&session);
        let _ = self.notices.send(RoomNotice::Unreachable { match_id: self.id, session });
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(MatchStatus {
            phase: self.state.phase,
            tick: self.state.tick,
            players: self.state.players.len(),
            spectators: self.broadcaster.spectator_count(),
            paused: self.state.paused,
            telemetry: self.telemetry.snapshot(),
        });
    }

    fn finish(&mut self) {
        let reason = self.state.outcome.map(|o| o.reason).unwrap_or(EndReason::Aborted);
        let info = MatchEndInfo::from_state(self.id.to_string(), &self.state, reason, &self.names);
        let winner = info.winner_id.clone();

        self.broadcaster.send_all(&ServerMessage::MatchEnd(info));
        let _ = self.notices.send(RoomNotice::Ended { match_id: self.id, reason });

        let telemetry = self.telemetry.snapshot();
        info!(
            ?reason,
            winner = ?winner,
            final_tick = self.state.tick,
            tps = %format!("{:.2}", telemetry.ticks_per_second()),
            avg_tick_us = telemetry.average_tick_us(),
            crocodiles_created = telemetry.crocodiles_created,
            "Match ended"
        );
    }

    // =========================================================================
    // OPERATOR COMMANDS
    // =========================================================================

    fn apply_admin(&mut self, command: MatchCommand) -> Result<String, String> {
        let outcome = match command {
            MatchCommand::SpawnCrocodile { kind, vine, y } => {
                let spawned = spawn_crocodile(&mut self.state, kind, vine, to_fixed(y));
                if spawned.is_ok() {
                    self.telemetry.record_crocodiles_created(1);
                }
                spawned
                    .map(|id| format!("crocodile {} ({:?}) on vine {} at y={:.1}", id, kind, vine, y))
                    .map_err(|e| e.to_string())
            }
            MatchCommand::AddFruit { vine, y, points } => {
                add_fruit(&mut self.state, vine, to_fixed(y), points)
                    .map(|id| format!("fruit {} on vine {} at y={:.1} worth {}", id, vine, y, points))
                    .map_err(|e| e.to_string())
            }
            MatchCommand::RemoveFruit { vine, y } => {
                remove_fruit(&mut self.state, vine, to_fixed(y))
                    .map(|fruit| format!("fruit {} removed from vine {}", fruit.id, fruit.vine))
                    .map_err(|e| e.to_string())
            }
            MatchCommand::ListEntities => Ok(self.describe_entities()),
            MatchCommand::Pause if self.state.paused => Err("already paused".to_string()),
            MatchCommand::Pause => {
                self.state.paused = true;
                Ok("paused".to_string())
            }
            MatchCommand::Resume if !self.state.paused => Err("not paused".to_string()),
            MatchCommand::Resume => {
                self.state.paused = false;
                Ok("resumed".to_string())
            }
        };

        match &outcome {
            Ok(text) => info!(result = %text, "Operator command applied"),
            Err(reason) => warn!(%reason, "Operator command rejected"),
        }
        outcome
    }

    fn describe_entities(&self) -> String {
        let mut lines = vec![format!(
            "tick {} level {} speed x{:.2} {}",
            self.state.tick,
            self.state.level,
            to_float(self.state.difficulty),
            if self.state.paused { "(paused)" } else { "" },
        )];
        for croc in self.state.crocodiles.values() {
            lines.push(format!(
                "  crocodile {} {:?} vine {} y={:.1} dir {}",
                croc.id, croc.kind, croc.vine, to_float(croc.y), croc.direction
            ));
        }
        for fruit in self.state.fruits.values() {
            lines.push(format!(
                "  fruit {} vine {} y={:.1} points {}",
                fruit.id, fruit.vine, to_float(fruit.y), fruit.points
            ));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::input::PlayerAction;
    use crate::game::state::CrocodileKind;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    fn fast_config() -> RoomConfig {
        RoomConfig {
            match_config: MatchConfig::for_tick_rate(100),
            ..RoomConfig::default()
        }
    }

    fn spawn_match() -> (MatchHandle, mpsc::UnboundedReceiver<RoomNotice>) {
        let (notices, notice_rx) = mpsc::unbounded_channel();
        let id = MatchId::new();
        let state = SimulationState::new(*id.as_bytes(), 42);
        (MatchActor::spawn(id, state, &fast_config(), notices), notice_rx)
    }

    fn join(handle: &MatchHandle, role: ClientRole) -> (SessionId, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(512);
        let session = SessionId::new();
        handle
            .control
            .send(MatchControl::Join { session, name: "p1".to_string(), role, sender: tx })
            .unwrap();
        (session, rx)
    }

    async fn next_message(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
        timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_player_join_starts_match() {
        let (mut handle, _notices) = spawn_match();
        let (_, mut rx) = join(&handle, ClientRole::Player);

        match next_message(&mut rx).await {
            ServerMessage::State { data } => {
                assert_eq!(data.players.len(), 1);
                assert_eq!(data.players[0].id, "p1");
                assert_eq!(data.phase, MatchPhase::Running);
            }
            other => panic!("expected STATE, got {:?}", other),
        }

        timeout(Duration::from_secs(2), handle.status.wait_for(|s| s.tick > 0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handle.status.borrow().players, 1);
    }

    #[tokio::test]
    async fn test_spectator_does_not_start_match() {
        let (mut handle, _notices) = spawn_match();
        let (_, mut rx) = join(&handle, ClientRole::Spectator);

        match next_message(&mut rx).await {
            ServerMessage::State { data } => {
                assert!(data.players.is_empty());
                assert_eq!(data.phase, MatchPhase::Waiting);
            }
            other => panic!("expected STATE, got {:?}", other),
        }
        handle.status.changed().await.unwrap();
        assert_eq!(handle.status.borrow().spectators, 1);
        assert_eq!(handle.status.borrow().phase, MatchPhase::Waiting);
    }

    #[tokio::test]
    async fn test_stop_sends_match_end_and_notice() {
        let (handle, mut notices) = spawn_match();
        let (_, mut rx) = join(&handle, ClientRole::Player);
        handle.control.send(MatchControl::Stop { reason: EndReason::Shutdown }).unwrap();

        let end = loop {
            if let ServerMessage::MatchEnd(info) = next_message(&mut rx).await {
                break info;
            }
        };
        assert_eq!(end.reason, EndReason::Shutdown);
        assert_eq!(end.scores.len(), 1);

        let notice = timeout(Duration::from_secs(2), notices.recv()).await.unwrap().unwrap();
        assert!(matches!(notice, RoomNotice::Ended { reason: EndReason::Shutdown, .. }));
        timeout(Duration::from_secs(2), handle.task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_admin_commands() {
        let (handle, _notices) = spawn_match();

        let (reply, answer) = oneshot::channel();
        handle
            .control
            .send(MatchControl::Admin {
                command: MatchCommand::SpawnCrocodile { kind: CrocodileKind::Blue, vine: 3, y: 200.0 },
                reply,
            })
            .unwrap();
        let text = answer.await.unwrap().unwrap();
        assert!(text.contains("vine 3"));

        let (reply, answer) = oneshot::channel();
        handle
            .control
            .send(MatchControl::Admin {
                command: MatchCommand::AddFruit { vine: 99, y: 200.0, points: 10 },
                reply,
            })
            .unwrap();
        assert!(answer.await.unwrap().is_err());

        let (reply, answer) = oneshot::channel();
        handle.control.send(MatchControl::Admin { command: MatchCommand::Resume, reply }).unwrap();
        assert_eq!(answer.await.unwrap(), Err("not paused".to_string()));
    }

    #[tokio::test]
    async fn test_telemetry_counts_ticks_and_crocodiles() {
        let (mut handle, _notices) = spawn_match();
        let initial = handle.telemetry.snapshot().crocodiles_created;
        assert!(initial > 0);
        let (_, _rx) = join(&handle, ClientRole::Player);

        let (reply, answer) = oneshot::channel();
        handle
            .control
            .send(MatchControl::Admin {
                command: MatchCommand::SpawnCrocodile { kind: CrocodileKind::Red, vine: 2, y: 200.0 },
                reply,
            })
            .unwrap();
        answer.await.unwrap().unwrap();

        timeout(Duration::from_secs(2), handle.status.wait_for(|s| s.telemetry.ticks >= 5))
            .await
            .unwrap()
            .unwrap();
        let published = handle.status.borrow().telemetry;
        assert_eq!(published.crocodiles_created, initial + 1);
        assert_eq!(published.expected_interval_us, 10_000);
        assert!(published.last_interval_us > 0);
        assert!(published.max_tick_us >= published.last_tick_us);
        assert!(handle.telemetry.snapshot().ticks >= published.ticks);
    }

    #[tokio::test]
    async fn test_pause_reflected_in_status() {
        let (mut handle, _notices) = spawn_match();
        let (_, _rx) = join(&handle, ClientRole::Player);

        let (reply, answer) = oneshot::channel();
        handle.control.send(MatchControl::Admin { command: MatchCommand::Pause, reply }).unwrap();
        assert_eq!(answer.await.unwrap(), Ok("paused".to_string()));

        timeout(Duration::from_secs(2), handle.status.wait_for(|s| s.paused))
            .await
            .unwrap()
            .unwrap();
        let paused_at = handle.status.borrow().tick;

        // Inputs sent while paused are discarded and the tick holds
        handle
            .inputs
            .send(InputCommand { session: SessionId::new(), action: PlayerAction::Jump, seq: None })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.status.borrow().tick, paused_at);
    }

    #[tokio::test]
    async fn test_closed_participant_reported() {
        let (handle, mut notices) = spawn_match();
        let (session, rx) = join(&handle, ClientRole::Player);
        let (_, _keep) = join(&handle, ClientRole::Spectator);
        drop(rx);

        let notice = timeout(Duration::from_secs(2), notices.recv()).await.unwrap().unwrap();
        match notice {
            RoomNotice::Unreachable { session: dropped, .. } => assert_eq!(dropped, session),
            other => panic!("unexpected notice {:?}", other),
        }
    }
}

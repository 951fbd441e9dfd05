//! Room Manager
//!
//! Creates matches, tracks which session belongs to which match, and tears
//! matches down once their last participant leaves or they end.
//!
//! A session placed in a match is sent its `WELCOME` before the match task
//! learns about it, so the welcome always precedes the first state frame.
//!
//! Two background tasks run for the manager's lifetime:
//!
//! - a listener on the session registry that detaches disconnected sessions
//! - a reaper that removes ended matches and unreachable participants

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, instrument, warn};

use crate::core::rng::derive_match_seed;
use crate::game::events::EndReason;
use crate::game::input::PlayerAction;
use crate::game::state::SimulationState;
use crate::network::protocol::{ClientRole, MatchSummary};
use crate::network::session::{Session, SessionEvent, SessionId, SessionRegistry};
use crate::room::actor::{MatchActor, MatchHandle};
use crate::room::telemetry::TelemetrySnapshot;
use crate::room::{
    Greeting, InputCommand, MatchCommand, MatchControl, MatchId, RoomConfig, RoomError, RoomNotice,
};

/// How long shutdown waits for each match task.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

struct MatchEntry {
    players: BTreeMap<SessionId, String>,
    spectators: BTreeSet<SessionId>,
    handle: MatchHandle,
}

impl MatchEntry {
    fn participants(&self) -> usize {
        self.players.len() + self.spectators.len()
    }

    fn name_taken(&self, name: &str) -> bool {
        self.players.values().any(|n| n == name)
    }
}

#[derive(Default)]
struct RoomTables {
    matches: BTreeMap<MatchId, MatchEntry>,
    memberships: BTreeMap<SessionId, MatchId>,
}

/// Owner of every match on the server.
pub struct RoomManager {
    config: RoomConfig,
    registry: Arc<SessionRegistry>,
    tables: RwLock<RoomTables>,
    notices: mpsc::UnboundedSender<RoomNotice>,
    greeting: OnceLock<Greeting>,
    seed_salt: u64,
}

impl RoomManager {
    /// Create a manager and start its background tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: RoomConfig, registry: Arc<SessionRegistry>) -> Arc<Self> {
        let (notices, notice_rx) = mpsc::unbounded_channel();
        let session_events = registry.subscribe();

        let manager = Arc::new(Self {
            config,
            registry,
            tables: RwLock::new(RoomTables::default()),
            notices,
            greeting: OnceLock::new(),
            seed_salt: Utc::now().timestamp_micros() as u64,
        });

        tokio::spawn(run_disconnect_listener(Arc::downgrade(&manager), session_events));
        tokio::spawn(run_reaper(Arc::downgrade(&manager), notice_rx));

        manager
    }

    /// Room limits in effect.
    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// Send every session a `WELCOME` built from `greeting` when it is placed
    /// in a match. Only the first call takes effect.
    pub fn set_greeting(&self, greeting: Greeting) {
        let _ = self.greeting.set(greeting);
    }

    /// Queue the welcome, then hand the session to the match task.
    fn enroll(&self, entry: &MatchEntry, match_id: MatchId, session: &Session, role: ClientRole) -> Result<(), RoomError> {
        if entry.handle.control.is_closed() {
            return Err(RoomError::MatchEnded);
        }
        if let Some(greeting) = self.greeting.get() {
            session.handle.try_send(greeting.welcome(session.id, match_id, role));
        }
        entry
            .handle
            .control
            .send(MatchControl::Join {
                session: session.id,
                name: session.display_name(),
                role,
                sender: session.handle.sender.clone(),
            })
            .map_err(|_| RoomError::MatchEnded)
    }

    // =========================================================================
    // MATCH LIFECYCLE
    // =========================================================================

    /// Create a match with `sessions` as its players.
    ///
    /// # Errors
    ///
    /// - [`RoomError::CapacityExceeded`] at the match limit
    /// - [`RoomError::MatchFull`] with more sessions than player slots
    /// - [`RoomError::AlreadyInMatch`] if any session already plays or watches
    /// - [`RoomError::NameTaken`] if two sessions share a name
    #[instrument(skip(self, sessions), fields(players = sessions.len()))]
    pub async fn create_match(&self, sessions: &[SessionId]) -> Result<MatchId, RoomError> {
        let unique: BTreeSet<SessionId> = sessions.iter().copied().collect();
        if unique.is_empty() {
            return Err(RoomError::NoPlayers);
        }
        if unique.len() > self.config.max_players_per_match {
            return Err(RoomError::MatchFull { max: self.config.max_players_per_match });
        }

        let mut joining: Vec<Session> = Vec::with_capacity(unique.len());
        for id in &unique {
            let session = self.registry.lookup(id).await?;
            let name = session.display_name();
            if joining.iter().any(|s| s.display_name() == name) {
                return Err(RoomError::NameTaken(name));
            }
            joining.push(session);
        }

        let mut guard = self.tables.write().await;
        let tables = &mut *guard;

        if let Some(busy) = unique.iter().find(|id| tables.memberships.contains_key(*id)) {
            return Err(RoomError::AlreadyInMatch(*busy));
        }
        let live = tables.matches.values().filter(|e| e.handle.is_live()).count();
        if live >= self.config.max_matches {
            warn!(max = self.config.max_matches, "Match limit reached");
            return Err(RoomError::CapacityExceeded { max: self.config.max_matches });
        }

        let match_id = MatchId::new();
        let seed = derive_match_seed(match_id.as_bytes(), self.seed_salt);
        let state = SimulationState::new(*match_id.as_bytes(), seed);
        let handle = MatchActor::spawn(match_id, state, &self.config, self.notices.clone());

        let mut entry = MatchEntry {
            players: BTreeMap::new(),
            spectators: BTreeSet::new(),
            handle,
        };
        for session in joining {
            let _ = self.enroll(&entry, match_id, &session, ClientRole::Player);
            entry.players.insert(session.id, session.display_name());
            tables.memberships.insert(session.id, match_id);
        }
        tables.matches.insert(match_id, entry);

        info!(match_id = %match_id, seed, "Match created");
        Ok(match_id)
    }

    /// Add a session to an existing match.
    ///
    /// # Errors
    ///
    /// - [`RoomError::MatchNotFound`] / [`RoomError::MatchEnded`]
    /// - [`RoomError::AlreadyInMatch`] if the session is elsewhere
    /// - [`RoomError::MatchFull`] or [`RoomError::SpectatorsFull`]
    /// - [`RoomError::NameTaken`] if a player there already uses the name
    /// - [`RoomError::NoPlayers`] when spectating a match nobody plays
    #[instrument(skip(self))]
    pub async fn join_match(&self, session: SessionId, match_id: MatchId, role: ClientRole) -> Result<(), RoomError> {
        let joining = self.registry.lookup(&session).await?;

        let mut guard = self.tables.write().await;
        let tables = &mut *guard;

        if tables.memberships.contains_key(&session) {
            return Err(RoomError::AlreadyInMatch(session));
        }
        let entry = tables
            .matches
            .get_mut(&match_id)
            .ok_or_else(|| RoomError::MatchNotFound(match_id.to_string()))?;
        if !entry.handle.is_live() {
            return Err(RoomError::MatchEnded);
        }

        match role {
            ClientRole::Player if entry.players.len() >= self.config.max_players_per_match => {
                return Err(RoomError::MatchFull { max: self.config.max_players_per_match });
            }
            ClientRole::Player if entry.name_taken(&joining.display_name()) => {
                return Err(RoomError::NameTaken(joining.display_name()));
            }
            ClientRole::Spectator if entry.players.is_empty() => return Err(RoomError::NoPlayers),
            ClientRole::Spectator if entry.spectators.len() >= self.config.max_spectators_per_match => {
                return Err(RoomError::SpectatorsFull { max: self.config.max_spectators_per_match });
            }
            _ => {}
        }

        self.enroll(entry, match_id, &joining, role)?;

        match role {
            ClientRole::Player => {
                entry.players.insert(session, joining.display_name());
            }
            ClientRole::Spectator => {
                entry.spectators.insert(session);
            }
        }
        tables.memberships.insert(session, match_id);

        info!(match_id = %match_id, session = %session, ?role, "Joined match");
        Ok(())
    }

    /// Join the first match with a free player slot, or create one.
    pub async fn quick_join(&self, session: SessionId) -> Result<MatchId, RoomError> {
        let open = {
            let tables = self.tables.read().await;
            tables
                .matches
                .iter()
                .find(|(_, e)| e.handle.is_live() && e.players.len() < self.config.max_players_per_match)
                .map(|(id, _)| *id)
        };

        if let Some(match_id) = open {
            match self.join_match(session, match_id, ClientRole::Player).await {
                Ok(()) => return Ok(match_id),
                // Filled or ended since the lookup, or the name is in use there
                Err(RoomError::MatchFull { .. })
                | Err(RoomError::MatchEnded)
                | Err(RoomError::MatchNotFound(_))
                | Err(RoomError::NameTaken(_)) => {}
                Err(e) => return Err(e),
            }
        }

        self.create_match(&[session]).await
    }

    /// Watch a match: the given one, or the first with players.
    pub async fn spectate(&self, session: SessionId, target: Option<MatchId>) -> Result<MatchId, RoomError> {
        let match_id = match target {
            Some(id) => id,
            None => {
                let tables = self.tables.read().await;
                tables
                    .matches
                    .iter()
                    .find(|(_, e)| e.handle.is_live() && !e.players.is_empty())
                    .map(|(id, _)| *id)
                    .ok_or(RoomError::NoPlayers)?
            }
        };

        self.join_match(session, match_id, ClientRole::Spectator).await?;
        Ok(match_id)
    }

    /// Remove a session from its match.
    ///
    /// The match is destroyed when its last participant leaves.
    #[instrument(skip(self))]
    pub async fn leave_match(&self, session: &SessionId) -> Result<MatchId, RoomError> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;

        let match_id = tables.memberships.remove(session).ok_or(RoomError::NotInMatch)?;

        let empty = match tables.matches.get_mut(&match_id) {
            Some(entry) => {
                entry.players.remove(session);
                entry.spectators.remove(session);
                let _ = entry.handle.control.send(MatchControl::Leave { session: *session });
                entry.participants() == 0
            }
            None => false,
        };

        if empty {
            if let Some(entry) = tables.matches.remove(&match_id) {
                let _ = entry.handle.control.send(MatchControl::Stop { reason: EndReason::Abandoned });
                info!(match_id = %match_id, "Last participant left, match destroyed");
            }
        }

        debug!(match_id = %match_id, session = %session, "Left match");
        Ok(match_id)
    }

    /// Drop an ended match and release its participants.
    async fn destroy_match(&self, match_id: &MatchId, reason: EndReason) {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;

        if tables.matches.remove(match_id).is_some() {
            tables.memberships.retain(|_, m| m != match_id);
            info!(match_id = %match_id, ?reason, "Match removed");
        }
    }

    // =========================================================================
    // ROUTING
    // =========================================================================

    /// Forward a player action to the session's match.
    ///
    /// A full input queue drops the action with a warning.
    pub async fn send_input(&self, session: &SessionId, action: PlayerAction, seq: Option<u64>) -> Result<(), RoomError> {
        let tables = self.tables.read().await;
        let match_id = tables.memberships.get(session).ok_or(RoomError::NotInMatch)?;
        let entry = tables.matches.get(match_id).ok_or(RoomError::NotInMatch)?;
        if entry.spectators.contains(session) {
            return Err(RoomError::SpectatorNotAllowed);
        }

        match entry.handle.inputs.try_send(InputCommand { session: *session, action, seq }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(match_id = %match_id, session = %session, "Input queue full, dropping input");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(RoomError::MatchEnded),
        }
    }

    /// Forward a state acknowledgement to the session's match.
    pub async fn acknowledge(&self, session: &SessionId, tick: u64) -> Result<(), RoomError> {
        let tables = self.tables.read().await;
        let match_id = tables.memberships.get(session).ok_or(RoomError::NotInMatch)?;
        let entry = tables.matches.get(match_id).ok_or(RoomError::NotInMatch)?;
        entry
            .handle
            .control
            .send(MatchControl::Ack { session: *session, tick })
            .map_err(|_| RoomError::MatchEnded)
    }

    /// Run an operator command in a match, by default the first listed one.
    pub async fn admin(&self, target: Option<MatchId>, command: MatchCommand) -> Result<String, RoomError> {
        let control = {
            let tables = self.tables.read().await;
            Self::target(&tables, target)?.1.handle.control.clone()
        };

        let (reply, answer) = oneshot::channel();
        control
            .send(MatchControl::Admin { command, reply })
            .map_err(|_| RoomError::MatchEnded)?;
        answer
            .await
            .map_err(|_| RoomError::MatchEnded)?
            .map_err(RoomError::Rejected)
    }

    fn target(tables: &RoomTables, target: Option<MatchId>) -> Result<(MatchId, &MatchEntry), RoomError> {
        match target {
            Some(id) => tables
                .matches
                .get(&id)
                .map(|entry| (id, entry))
                .ok_or_else(|| RoomError::MatchNotFound(id.to_string())),
            None => tables
                .matches
                .iter()
                .next()
                .map(|(id, entry)| (*id, entry))
                .ok_or(RoomError::NoActiveMatch),
        }
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Live telemetry of a match, by default the first listed one.
    pub async fn telemetry(&self, target: Option<MatchId>) -> Result<(MatchId, TelemetrySnapshot), RoomError> {
        let tables = self.tables.read().await;
        let (id, entry) = Self::target(&tables, target)?;
        Ok((id, entry.handle.telemetry.snapshot()))
    }

    /// The match a session belongs to.
    pub async fn match_of(&self, session: &SessionId) -> Option<MatchId> {
        self.tables.read().await.memberships.get(session).copied()
    }

    /// Number of matches, including ones being torn down.
    pub async fn match_count(&self) -> usize {
        self.tables.read().await.matches.len()
    }

    /// Summary of every match in id order.
    pub async fn list_matches(&self) -> Vec<MatchSummary> {
        let tables = self.tables.read().await;
        tables
            .matches
            .iter()
            .map(|(id, entry)| {
                let status = *entry.handle.status.borrow();
                MatchSummary {
                    match_id: id.to_string(),
                    phase: status.phase,
                    tick: status.tick,
                    players: entry.players.len(),
                    spectators: entry.spectators.len(),
                    max_players: self.config.max_players_per_match,
                    paused: status.paused,
                }
            })
            .collect()
    }

    /// Stop every match and wait for their final messages to go out.
    pub async fn shutdown(&self) {
        let entries: Vec<(MatchId, MatchEntry)> = {
            let mut tables = self.tables.write().await;
            tables.memberships.clear();
            std::mem::take(&mut tables.matches).into_iter().collect()
        };

        for (_, entry) in &entries {
            let _ = entry.handle.control.send(MatchControl::Stop { reason: EndReason::Shutdown });
        }
        for (match_id, entry) in entries {
            if tokio::time::timeout(SHUTDOWN_GRACE, entry.handle.task).await.is_err() {
                warn!(match_id = %match_id, "Match task did not stop in time");
            }
        }
        info!("All matches stopped");
    }
}

// =============================================================================
// BACKGROUND TASKS
// =============================================================================

async fn run_disconnect_listener(manager: Weak<RoomManager>, mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::Disconnected { id, reason }) => {
                let manager = match manager.upgrade() {
                    Some(manager) => manager,
                    None => break,
                };
                if let Ok(match_id) = manager.leave_match(&id).await {
                    debug!(session = %id, match_id = %match_id, %reason, "Detached disconnected session");
                }
            }
            Ok(SessionEvent::Connected(_)) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Session events lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn run_reaper(manager: Weak<RoomManager>, mut notices: mpsc::UnboundedReceiver<RoomNotice>) {
    while let Some(notice) = notices.recv().await {
        let manager = match manager.upgrade() {
            Some(manager) => manager,
            None => break,
        };
        match notice {
            RoomNotice::Ended { match_id, reason } => manager.destroy_match(&match_id, reason).await,
            RoomNotice::Unreachable { session, .. } => {
                let _ = manager.leave_match(&session).await;
                if let Ok(found) = manager.registry.lookup(&session).await {
                    found.handle.close();
                }
            }
        }
    }
}

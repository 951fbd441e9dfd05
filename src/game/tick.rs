//! Authoritative Simulation Tick
//!
//! The core game loop. Given the same state and the same queued inputs it
//! always produces the same next state, which is what lets replays and the
//! per-tick state hash line up across runs.

use crate::core::fixed::{
    Fixed, FIXED_ONE,
    fixed_mul, fixed_div, fixed_min, fixed_clamp, fixed_approach, from_int,
    WALK_MAX_SPEED, WALK_ACCELERATION, WALK_FRICTION, AIR_CONTROL,
    GRAVITY, JUMP_VELOCITY, VINE_CLIMB_SPEED, WORLD_BOTTOM,
    DIFFICULTY_STEP, MAX_DIFFICULTY, SCORE_PER_RESCUE,
};
use crate::core::vec2::FixedVec2;
use crate::DEFAULT_TICK_RATE;
use crate::game::collision::{find_crocodile_hits, find_fruit_pickups};
use crate::game::crocodile::update_crocodiles;
use crate::game::events::{EndReason, GameEvent};
use crate::game::fruit::{collect_fruit, seed_fruits};
use crate::game::input::{Intent, PlayerAction};
use crate::game::map::{JungleMap, Vine};
use crate::game::state::{
    Facing, MatchOutcome, MatchPhase, PlayerId, PlayerMode, PlayerState,
    SimulationError, SimulationState,
};

/// Result of a tick.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Events generated this tick, in delivery order
    pub events: Vec<GameEvent>,
    /// Whether the match is over
    pub match_ended: bool,
    /// Winner (if match ended with winner)
    pub winner: Option<PlayerId>,
    /// Final outcome once ended
    pub outcome: Option<MatchOutcome>,
    /// Blue crocodiles that reached the water this tick
    pub crocodiles_removed: Vec<u32>,
}

/// Configuration for match simulation.
///
/// Every duration is expressed in ticks so the simulation never reads a clock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchConfig {
    /// Ticks per second
    pub tick_rate: u32,
    /// Seconds per tick (Q16.16)
    pub dt: Fixed,
    /// Ticks a movement action stays held (~150 ms)
    pub input_hold_ticks: u32,
    /// Ticks between vine switches (~250 ms)
    pub vine_switch_cooldown_ticks: u32,
    /// Protection after a respawn (~2 s)
    pub invulnerability_ticks: u32,
    /// Freeze after a rescue (~1.5 s)
    pub celebration_ticks: u32,
    /// Rescues needed to win; 0 plays until everyone is out
    pub rescues_to_win: u32,
}

impl MatchConfig {
    /// Derive tick-based durations from a tick rate.
    pub fn for_tick_rate(tick_rate: u32) -> Self {
        let rate = tick_rate.max(1);
        Self {
            tick_rate: rate,
            dt: fixed_div(FIXED_ONE, from_int(rate as i32)),
            input_hold_ticks: (rate * 3 / 20).max(1),
            vine_switch_cooldown_ticks: (rate / 4).max(1),
            invulnerability_ticks: rate * 2,
            celebration_ticks: ((rate * 3 + 1) / 2).max(1),
            rescues_to_win: 3,
        }
    }

    /// Override the rescue target.
    pub fn with_rescues_to_win(mut self, rescues: u32) -> Self {
        self.rescues_to_win = rescues;
        self
    }
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self::for_tick_rate(DEFAULT_TICK_RATE)
    }
}

/// Per-player result of the physics step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StepOutcome {
    None,
    Drowned,
    Rescued,
    CelebrationOver,
}

/// Run one simulation tick.
///
/// Phases, in order:
///
/// 1. Queued inputs are folded into intents in receipt order
/// 2. Player physics (players in id order)
/// 3. Drownings, rescues and finished celebrations
/// 4. Crocodiles move
/// 5. Crocodile hits, then fruit pickups
/// 6. End conditions
///
/// A `Waiting` or `Ended` match does not advance. A paused match discards
/// its queued inputs and does not advance either.
///
/// # Errors
///
/// Returns [`SimulationError`] when the state fails validation after the
/// tick; the caller should abort the match.
pub fn tick(state: &mut SimulationState, config: &MatchConfig) -> Result<TickResult, SimulationError> {
    let mut result = TickResult::default();

    match state.phase {
        MatchPhase::Waiting => return Ok(result),
        MatchPhase::Ended => {
            result.match_ended = true;
            result.outcome = state.outcome;
            result.winner = state.outcome.and_then(|o| o.winner);
            return Ok(result);
        }
        MatchPhase::Running => {}
    }

    if state.paused {
        state.inputs.clear();
        return Ok(result);
    }

    // 0. Advance tick counter
    state.tick += 1;

    // 1. Apply player inputs
    apply_inputs(state, config);

    // 2. Player physics
    let outcomes = update_players(state, config);

    // 3. Drowning, rescues, celebrations
    let winner = resolve_outcomes(state, outcomes, config);

    // 4. Crocodiles
    result.crocodiles_removed = update_crocodiles(state, config.dt);

    // 5. Collisions
    process_crocodile_hits(state, config);
    process_fruit_pickups(state);

    // 6. End conditions
    check_end_conditions(state, winner, &mut result);

    state.validate()?;

    let mut events = state.take_events();
    events.sort();
    result.events = events;
    Ok(result)
}

/// Fold queued inputs into player intents, in the order they arrived.
fn apply_inputs(state: &mut SimulationState, config: &MatchConfig) {
    for input in state.inputs.drain() {
        if let Some(player) = state.players.get_mut(&input.player_id) {
            if !player.is_interactive() {
                continue;
            }
            player.intent.apply(input.action, config.input_hold_ticks);
        }
    }
}

fn update_players(state: &mut SimulationState, config: &MatchConfig) -> Vec<(PlayerId, StepOutcome)> {
    let map = &state.map;
    let mut outcomes = Vec::new();

    // BTreeMap values_mut iterates in sorted order
    for player in state.players.values_mut() {
        let outcome = step_player(player, map, config);
        if outcome != StepOutcome::None {
            outcomes.push((player.id, outcome));
        }
    }

    outcomes
}

fn step_player(player: &mut PlayerState, map: &JungleMap, config: &MatchConfig) -> StepOutcome {
    player.invulnerable_ticks = player.invulnerable_ticks.saturating_sub(1);
    player.vine_cooldown = player.vine_cooldown.saturating_sub(1);

    let intent = player.intent;
    if intent.horizontal < 0 {
        player.facing = Facing::Left;
    } else if intent.horizontal > 0 {
        player.facing = Facing::Right;
    }

    let outcome = match player.mode {
        PlayerMode::Dead => StepOutcome::None,
        PlayerMode::Celebrating => {
            player.celebrate_ticks = player.celebrate_ticks.saturating_sub(1);
            if player.celebrate_ticks == 0 {
                StepOutcome::CelebrationOver
            } else {
                StepOutcome::None
            }
        }
        PlayerMode::Ground => step_ground(player, &intent, map, config),
        PlayerMode::OnVine { vine } => step_vine(player, vine, &intent, map, config),
        PlayerMode::Airborne => step_airborne(player, &intent, map, config),
    };

    player.intent.end_tick();

    if outcome == StepOutcome::None
        && player.is_interactive()
        && map.is_goal(player.position.x, player.position.y)
    {
        return StepOutcome::Rescued;
    }
    outcome
}

fn step_ground(player: &mut PlayerState, intent: &Intent, map: &JungleMap, config: &MatchConfig) -> StepOutcome {
    if intent.jump_pressed() {
        player.velocity.y = -JUMP_VELOCITY;
        player.mode = PlayerMode::Airborne;
        return StepOutcome::None;
    }

    if intent.wants_grab() {
        if let Some(vine) = map.grabbable_vine(player.position.x, player.position.y) {
            attach(player, vine);
            return StepOutcome::None;
        }
    }

    let rate = if intent.horizontal != 0 { WALK_ACCELERATION } else { WALK_FRICTION };
    let target = WALK_MAX_SPEED * intent.horizontal as i32;
    player.velocity.x = fixed_approach(player.velocity.x, target, fixed_mul(rate, config.dt));
    move_horizontally(player, map, config.dt);

    // Walked off the edge
    if map.platform_at(player.position.x, player.position.y).is_none() {
        player.mode = PlayerMode::Airborne;
        player.velocity.y = 0;
    }
    StepOutcome::None
}

fn step_vine(
    player: &mut PlayerState,
    vine_index: u8,
    intent: &Intent,
    map: &JungleMap,
    config: &MatchConfig,
) -> StepOutcome {
    let mut vine = match map.vine(vine_index) {
        Some(vine) => *vine,
        None => {
            player.mode = PlayerMode::Airborne;
            return StepOutcome::None;
        }
    };

    if intent.jump_pressed() {
        player.mode = PlayerMode::Airborne;
        player.velocity = FixedVec2::new(WALK_MAX_SPEED * intent.horizontal as i32, -JUMP_VELOCITY);
        return StepOutcome::None;
    }

    if intent.release_pressed() {
        player.mode = PlayerMode::Airborne;
        player.velocity = FixedVec2::ZERO;
        return StepOutcome::None;
    }

    if intent.horizontal != 0 && player.vine_cooldown == 0 {
        let neighbour = map
            .vine_at(vine.index as i32 + intent.horizontal as i32)
            .filter(|next| next.covers(player.position.y))
            .copied();
        if let Some(next) = neighbour {
            vine = next;
            player.position.x = next.x;
            player.mode = PlayerMode::OnVine { vine: next.index };
            player.vine_cooldown = config.vine_switch_cooldown_ticks;
        }
    }

    let y = player.position.y + fixed_mul(VINE_CLIMB_SPEED, config.dt) * intent.vertical as i32;
    player.velocity = FixedVec2::ZERO;

    // Climbing down past the end lets go
    if intent.vertical > 0 && y > vine.bottom {
        player.position.y = vine.bottom;
        player.mode = PlayerMode::Airborne;
        return StepOutcome::None;
    }

    player.position.y = fixed_clamp(y, vine.top, vine.bottom);
    StepOutcome::None
}

fn step_airborne(player: &mut PlayerState, intent: &Intent, map: &JungleMap, config: &MatchConfig) -> StepOutcome {
    let prev_y = player.position.y;
    player.velocity.y += fixed_mul(GRAVITY, config.dt);

    if intent.horizontal != 0 {
        let target = WALK_MAX_SPEED * intent.horizontal as i32;
        let step = fixed_mul(fixed_mul(WALK_ACCELERATION, AIR_CONTROL), config.dt);
        player.velocity.x = fixed_approach(player.velocity.x, target, step);
    }
    move_horizontally(player, map, config.dt);

    let y = prev_y + fixed_mul(player.velocity.y, config.dt);
    if y < 0 {
        player.position.y = 0;
        player.velocity.y = 0;
    } else {
        player.position.y = fixed_min(y, WORLD_BOTTOM);
    }

    if intent.wants_grab() {
        if let Some(vine) = map.grabbable_vine(player.position.x, player.position.y) {
            attach(player, vine);
            return StepOutcome::None;
        }
    }

    if player.velocity.y >= 0 {
        if let Some(platform) = map.landing_platform(player.position.x, prev_y, player.position.y) {
            player.position.y = platform.y;
            player.velocity.y = 0;
            player.mode = PlayerMode::Ground;
            return StepOutcome::None;
        }
    }

    if map.is_underwater(player.position.y) {
        return StepOutcome::Drowned;
    }
    StepOutcome::None
}

fn move_horizontally(player: &mut PlayerState, map: &JungleMap, dt: Fixed) {
    let x = player.position.x + fixed_mul(player.velocity.x, dt);
    let clamped = fixed_clamp(x, 0, map.max_x());
    if clamped != x {
        player.velocity.x = 0;
    }
    player.position.x = clamped;
}

fn attach(player: &mut PlayerState, vine: &Vine) {
    player.mode = PlayerMode::OnVine { vine: vine.index };
    player.position.x = vine.x;
    player.position.y = fixed_clamp(player.position.y, vine.top, vine.bottom);
    player.velocity = FixedVec2::ZERO;
}

/// Apply drownings, rescues and finished celebrations. Returns the winner, if any.
fn resolve_outcomes(
    state: &mut SimulationState,
    outcomes: Vec<(PlayerId, StepOutcome)>,
    config: &MatchConfig,
) -> Option<PlayerId> {
    let tick = state.tick;
    let mut winner = None;

    for (id, outcome) in outcomes {
        match outcome {
            StepOutcome::Drowned => lose_life(state, id, None, config),
            StepOutcome::Rescued => {
                let progress = state.players.get_mut(&id).map(|player| {
                    player.add_score(SCORE_PER_RESCUE);
                    player.rescues += 1;
                    player.mode = PlayerMode::Celebrating;
                    player.velocity = FixedVec2::ZERO;
                    player.intent = Intent::default();
                    player.celebrate_ticks = config.celebration_ticks;
                    (player.rescues, player.score)
                });
                let Some((rescues, score)) = progress else { continue };

                state.push_event(GameEvent::player_rescue(tick, id, rescues, score));
                if config.rescues_to_win > 0 && rescues >= config.rescues_to_win && winner.is_none() {
                    winner = Some(id);
                    state.push_event(GameEvent::player_win(tick, id));
                }
            }
            StepOutcome::CelebrationOver => level_up(state, id, config),
            StepOutcome::None => {}
        }
    }

    winner
}

/// Take a life from a player, respawning them or marking them dead.
fn lose_life(state: &mut SimulationState, id: PlayerId, crocodile: Option<u32>, config: &MatchConfig) {
    let spawn = state.map.spawn_point();
    let tick = state.tick;

    let lives_left = match state.players.get_mut(&id) {
        Some(player) if player.is_alive() => {
            player.lives = player.lives.saturating_sub(1);
            if player.lives == 0 {
                player.mode = PlayerMode::Dead;
                player.velocity = FixedVec2::ZERO;
                player.intent = Intent::default();
            } else {
                player.respawn(spawn, config.invulnerability_ticks);
            }
            player.lives
        }
        _ => return,
    };

    let event = match crocodile {
        Some(crocodile_id) => GameEvent::player_hit(tick, id, crocodile_id, lives_left),
        None => GameEvent::player_drowned(tick, id, lives_left),
    };
    state.push_event(event);

    if lives_left == 0 {
        state.push_event(GameEvent::player_eliminated(tick, id));
    }
}

/// Raise the level after a celebration and send the player back to the start.
fn level_up(state: &mut SimulationState, id: PlayerId, config: &MatchConfig) {
    state.level += 1;
    state.difficulty = fixed_min(fixed_mul(state.difficulty, DIFFICULTY_STEP), MAX_DIFFICULTY);
    seed_fruits(state);

    let spawn = state.map.spawn_point();
    if let Some(player) = state.players.get_mut(&id) {
        player.respawn(spawn, config.invulnerability_ticks);
    }

    let (tick, level, difficulty) = (state.tick, state.level, state.difficulty);
    state.push_event(GameEvent::level_up(tick, id, level, difficulty));
}

fn process_crocodile_hits(state: &mut SimulationState, config: &MatchConfig) {
    for (player_id, crocodile_id) in find_crocodile_hits(state) {
        lose_life(state, player_id, Some(crocodile_id), config);
    }
}

fn process_fruit_pickups(state: &mut SimulationState) {
    for (player_id, fruit_id) in find_fruit_pickups(state) {
        collect_fruit(state, player_id, fruit_id);
    }
}

/// Check if match should end.
fn check_end_conditions(state: &mut SimulationState, winner: Option<PlayerId>, result: &mut TickResult) {
    if let Some(id) = winner {
        state.end(EndReason::Victory, Some(id));
    } else if state.players.is_empty() {
        state.end(EndReason::Abandoned, None);
    } else if state.alive_player_count() == 0 {
        state.end(EndReason::AllEliminated, None);
    }

    if state.is_ended() {
        result.match_ended = true;
        result.outcome = state.outcome;
        result.winner = state.outcome.and_then(|o| o.winner);
    }
}

/// Replay a match from recorded inputs.
///
/// `inputs[t]` holds the actions received before tick `t + 1`, in receipt
/// order. The state is started if it is still waiting.
pub fn replay_match(
    initial_state: SimulationState,
    inputs: &[Vec<(PlayerId, PlayerAction)>],
    config: &MatchConfig,
) -> Result<(SimulationState, Vec<GameEvent>), SimulationError> {
    let mut state = initial_state;
    let mut all_events = Vec::new();

    state.start();

    for tick_inputs in inputs {
        for (player_id, action) in tick_inputs {
            state.queue_input(*player_id, *action, None);
        }

        let result = tick(&mut state, config)?;
        all_events.extend(result.events);

        if result.match_ended {
            break;
        }
    }

    Ok((state, all_events))
}

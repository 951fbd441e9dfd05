//! Fruit Placement and Pickup

use crate::core::fixed::{
    Fixed, fixed_abs, from_int, to_float,
    FRUIT_MIN_SPACING, FRUIT_DELETE_TOLERANCE, SCORE_PER_FRUIT,
};
use crate::game::events::GameEvent;
use crate::game::state::{FruitState, PlayerId, SimulationState, SpawnError};

/// Vines that receive seeded fruit (exclusive upper bound).
const SEED_VINES: u32 = 4;

/// Hang a fruit on a vine.
pub fn add_fruit(
    state: &mut SimulationState,
    vine: u8,
    y: Fixed,
    points: u32,
) -> Result<u32, SpawnError> {
    if points == 0 {
        return Err(SpawnError::InvalidPoints);
    }
    let range = state.map.vine(vine).copied().ok_or(SpawnError::UnknownVine {
        vine,
        count: state.map.vine_count(),
    })?;
    if !range.covers(y) {
        return Err(SpawnError::OutOfRange {
            vine,
            y: to_float(y),
            top: to_float(range.top),
            bottom: to_float(range.bottom),
        });
    }
    if let Some(existing) = state
        .fruits
        .values()
        .find(|f| f.vine == vine && fixed_abs(f.y - y) < FRUIT_MIN_SPACING)
    {
        return Err(SpawnError::TooClose { vine, y: to_float(y), existing: existing.id });
    }

    let id = state.allocate_entity_id();
    state.fruits.insert(id, FruitState { id, vine, y, points });
    Ok(id)
}

/// Remove the fruit nearest to `y` on a vine, within half a unit.
pub fn remove_fruit(state: &mut SimulationState, vine: u8, y: Fixed) -> Result<FruitState, SpawnError> {
    let id = state
        .fruits
        .values()
        .filter(|f| f.vine == vine && fixed_abs(f.y - y) <= FRUIT_DELETE_TOLERANCE)
        .min_by_key(|f| fixed_abs(f.y - y))
        .map(|f| f.id)
        .ok_or(SpawnError::FruitNotFound { vine, y: to_float(y) })?;

    state
        .fruits
        .remove(&id)
        .ok_or(SpawnError::FruitNotFound { vine, y: to_float(y) })
}

/// Replace all fruit with 2 to 4 fresh ones on the left vines.
pub fn seed_fruits(state: &mut SimulationState) {
    state.fruits.clear();
    let count = state.rng.next_int_range(2, 4);
    for _ in 0..count {
        let vine = state.rng.next_int(SEED_VINES) as u8;
        let y = state.rng.next_fixed_range(from_int(150), from_int(400));
        // A draw too close to an earlier fruit is skipped
        let _ = add_fruit(state, vine, y, SCORE_PER_FRUIT);
    }
}

/// Award a fruit to a player and remove it.
pub fn collect_fruit(state: &mut SimulationState, player_id: PlayerId, fruit_id: u32) -> bool {
    let fruit = match state.fruits.remove(&fruit_id) {
        Some(fruit) => fruit,
        None => return false,
    };
    let new_score = match state.players.get_mut(&player_id) {
        Some(player) => {
            player.add_score(fruit.points);
            player.score
        }
        None => return false,
    };
    let tick = state.tick;
    state.push_event(GameEvent::fruit_taken(tick, player_id, fruit.id, fruit.points, new_score));
    true
}

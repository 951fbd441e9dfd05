//! Crocodile Behaviour
//!
//! Red crocodiles patrol their vine end to end; blue crocodiles slide down
//! and fall into the water. Speeds scale with the match difficulty.

use crate::core::fixed::{
    Fixed, fixed_mul, from_int, to_float,
    RED_CROCODILE_SPEEDS, BLUE_CROCODILE_SPEED,
};
use crate::game::state::{CrocodileKind, CrocodileState, SimulationState, SpawnError};

/// Place a crocodile on a vine.
///
/// Red crocodiles draw their speed and heading from the match RNG; blue
/// ones always head down at the blue speed.
pub fn spawn_crocodile(
    state: &mut SimulationState,
    kind: CrocodileKind,
    vine: u8,
    y: Fixed,
) -> Result<u32, SpawnError> {
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

    let (speed, direction) = match kind {
        CrocodileKind::Red => {
            let speed = state.rng.choose(&RED_CROCODILE_SPEEDS).copied().unwrap_or(RED_CROCODILE_SPEEDS[0]);
            (speed, state.rng.next_sign())
        }
        CrocodileKind::Blue => (BLUE_CROCODILE_SPEED, 1),
    };

    Ok(insert_crocodile(state, kind, vine, y, speed, direction))
}

/// Starting crocodiles of a fresh match.
pub fn spawn_initial_crocodiles(state: &mut SimulationState) {
    insert_crocodile(state, CrocodileKind::Red, 0, from_int(150), RED_CROCODILE_SPEEDS[0], -1);
    insert_crocodile(state, CrocodileKind::Red, 2, from_int(300), RED_CROCODILE_SPEEDS[1], 1);
}

fn insert_crocodile(
    state: &mut SimulationState,
    kind: CrocodileKind,
    vine: u8,
    y: Fixed,
    speed: Fixed,
    direction: i8,
) -> u32 {
    let id = state.allocate_entity_id();
    state.crocodiles.insert(id, CrocodileState {
        id,
        kind,
        vine,
        y,
        direction,
        speed,
        alive: true,
    });
    id
}

/// Advance every crocodile by one tick of `dt` seconds.
///
/// Returns the ids of blue crocodiles that reached the water this tick.
pub fn update_crocodiles(state: &mut SimulationState, dt: Fixed) -> Vec<u32> {
    let scaled_dt = fixed_mul(dt, state.difficulty);

    for croc in state.crocodiles.values_mut() {
        let vine = match state.map.vine(croc.vine) {
            Some(vine) => *vine,
            None => {
                croc.alive = false;
                continue;
            }
        };
        let step = fixed_mul(croc.speed, scaled_dt);

        match croc.kind {
            CrocodileKind::Red => {
                croc.y += step * croc.direction as i32;
                if croc.y <= vine.top {
                    croc.y = vine.top;
                    croc.direction = 1;
                } else if croc.y >= vine.bottom {
                    croc.y = vine.bottom;
                    croc.direction = -1;
                }
            }
            CrocodileKind::Blue => {
                croc.y += step;
                if croc.y >= vine.bottom {
                    croc.y = vine.bottom;
                    croc.alive = false;
                }
            }
        }
    }

    let fallen: Vec<u32> = state
        .crocodiles
        .values()
        .filter(|c| !c.alive)
        .map(|c| c.id)
        .collect();
    state.crocodiles.retain(|_, c| c.alive);
    fallen
}

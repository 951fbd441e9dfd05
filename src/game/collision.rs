//! Collision Detection
//!
//! Players are checked in id order and crocodiles/fruits in id order, so
//! simultaneous contacts always resolve the same way.

use std::collections::BTreeSet;

use crate::core::fixed::{Fixed, fixed_abs, from_int, CROCODILE_HIT_DY, FRUIT_PICKUP_DY, VINE_GRAB_DISTANCE};
use crate::game::state::{PlayerId, PlayerState, SimulationState};

/// Whether a player at column `x` is on vine `vine`'s column.
#[inline]
pub fn on_vine_column(x: Fixed, vine: u8) -> bool {
    fixed_abs(x - from_int(vine as i32)) <= VINE_GRAB_DISTANCE
}

fn touches(player: &PlayerState, vine: u8, y: Fixed, reach: Fixed) -> bool {
    on_vine_column(player.position.x, vine) && fixed_abs(player.position.y - y) < reach
}

/// Players touching a crocodile this tick, with the first crocodile each touches.
///
/// Invulnerable, celebrating and dead players are skipped.
pub fn find_crocodile_hits(state: &SimulationState) -> Vec<(PlayerId, u32)> {
    state
        .players
        .values()
        .filter(|p| p.is_interactive() && p.invulnerable_ticks == 0)
        .filter_map(|player| {
            state
                .crocodiles
                .values()
                .find(|c| touches(player, c.vine, c.y, CROCODILE_HIT_DY))
                .map(|c| (player.id, c.id))
        })
        .collect()
}

/// Fruit pickups this tick. Each fruit goes to the first player in id order.
pub fn find_fruit_pickups(state: &SimulationState) -> Vec<(PlayerId, u32)> {
    let mut claimed = BTreeSet::new();
    let mut pickups = Vec::new();

    for player in state.players.values().filter(|p| p.is_interactive()) {
        for fruit in state.fruits.values() {
            if claimed.contains(&fruit.id) {
                continue;
            }
            if touches(player, fruit.vine, fruit.y, FRUIT_PICKUP_DY) {
                claimed.insert(fruit.id);
                pickups.push((player.id, fruit.id));
            }
        }
    }

    pickups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::to_fixed;
    use crate::game::crocodile::spawn_crocodile;
    use crate::game::fruit::add_fruit;
    use crate::game::state::{CrocodileKind, PlayerMode};

    fn place(state: &mut SimulationState, byte: u8, vine: u8, y: i32) -> PlayerId {
        let id = PlayerId::new([byte; 16]);
        state.add_player(id);
        if let Some(player) = state.players.get_mut(&id) {
            player.mode = PlayerMode::OnVine { vine };
            player.position.x = from_int(vine as i32);
            player.position.y = from_int(y);
        }
        id
    }

    #[test]
    fn test_on_vine_column() {
        assert!(on_vine_column(from_int(3), 3));
        assert!(on_vine_column(to_fixed(3.3), 3));
        assert!(!on_vine_column(to_fixed(3.5), 3));
        assert!(!on_vine_column(from_int(3), 4));
    }

    #[test]
    fn test_crocodile_hit_window() {
        let mut state = SimulationState::empty([0; 16], 1);
        let near = place(&mut state, 1, 2, 200);
        let far = place(&mut state, 2, 2, 260);
        let croc = spawn_crocodile(&mut state, CrocodileKind::Red, 2, from_int(225)).unwrap();

        // 25 units away hits, 35 does not
        assert_eq!(find_crocodile_hits(&state), vec![(near, croc)]);

        state.players.get_mut(&near).unwrap().invulnerable_ticks = 5;
        assert!(find_crocodile_hits(&state).is_empty());
        let _ = far;
    }

    #[test]
    fn test_fruit_goes_to_lower_player_id() {
        let mut state = SimulationState::empty([0; 16], 1);
        let second = place(&mut state, 9, 1, 300);
        let first = place(&mut state, 2, 1, 305);
        let fruit = add_fruit(&mut state, 1, from_int(310), 50).unwrap();

        assert_eq!(find_fruit_pickups(&state), vec![(first, fruit)]);
        assert_ne!(first, second);
    }

    #[test]
    fn test_dead_players_ignored() {
        let mut state = SimulationState::empty([0; 16], 1);
        let id = place(&mut state, 1, 0, 300);
        add_fruit(&mut state, 0, from_int(300), 10).unwrap();
        spawn_crocodile(&mut state, CrocodileKind::Red, 0, from_int(300)).unwrap();

        state.players.get_mut(&id).unwrap().mode = PlayerMode::Dead;
        assert!(find_fruit_pickups(&state).is_empty());
        assert!(find_crocodile_hits(&state).is_empty());
    }
}

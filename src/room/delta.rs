//! Snapshot Diffing
//!
//! Builds a [`StateDelta`] from the snapshot a client acknowledged to the
//! current one. Entities are matched by id; anything new or changed is sent
//! whole, anything missing is listed as removed.

use std::collections::BTreeMap;

use crate::network::protocol::{StateDelta, StateSnapshot};

/// Entities present in `current` that are new or differ from `base`,
/// plus the keys present only in `base`.
fn diff_entities<T, K, F>(base: &[T], current: &[T], key: F) -> (Vec<T>, Vec<K>)
where
    T: Clone + PartialEq,
    K: Ord + Clone,
    F: Fn(&T) -> K,
{
    let base_by_key: BTreeMap<K, &T> = base.iter().map(|e| (key(e), e)).collect();
    let current_keys: BTreeMap<K, ()> = current.iter().map(|e| (key(e), ())).collect();

    let changed = current
        .iter()
        .filter(|e| base_by_key.get(&key(e)).map_or(true, |b| *b != *e))
        .cloned()
        .collect();

    let removed = base_by_key
        .keys()
        .filter(|k| !current_keys.contains_key(*k))
        .cloned()
        .collect();

    (changed, removed)
}

/// Delta from `base` to `current`, or `None` when nothing changed.
pub fn diff_snapshots(base: &StateSnapshot, current: &StateSnapshot) -> Option<StateDelta> {
    let (players, removed_players) =
        diff_entities(&base.players, &current.players, |p| p.session_id.clone());
    let (crocodiles, removed_crocodiles) = diff_entities(&base.crocodiles, &current.crocodiles, |c| c.id);
    let (fruits, removed_fruits) = diff_entities(&base.fruits, &current.fruits, |f| f.id);

    let header_changed = base.tick != current.tick
        || base.level != current.level
        || base.speed_multiplier != current.speed_multiplier
        || base.paused != current.paused
        || base.phase != current.phase;

    let entities_changed = !players.is_empty()
        || !crocodiles.is_empty()
        || !fruits.is_empty()
        || !removed_players.is_empty()
        || !removed_crocodiles.is_empty()
        || !removed_fruits.is_empty();

    if !header_changed && !entities_changed {
        return None;
    }

    Some(StateDelta {
        base_tick: base.tick,
        tick: current.tick,
        level: current.level,
        speed_multiplier: current.speed_multiplier,
        paused: current.paused,
        phase: current.phase,
        state_hash: current.state_hash.clone(),
        players,
        crocodiles,
        fruits,
        removed_players,
        removed_crocodiles,
        removed_fruits,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::crocodile::spawn_initial_crocodiles;
    use crate::game::fruit::add_fruit;
    use crate::game::state::{PlayerId, SimulationState};
    use crate::core::fixed::from_int;

    fn capture(state: &SimulationState) -> StateSnapshot {
        StateSnapshot::capture(state, &BTreeMap::new())
    }

    #[test]
    fn test_identical_snapshots_produce_nothing() {
        let mut state = SimulationState::empty([0; 16], 1);
        spawn_initial_crocodiles(&mut state);
        let snapshot = capture(&state);

        assert!(diff_snapshots(&snapshot, &snapshot).is_none());
    }

    #[test]
    fn test_changed_and_removed_entities() {
        let mut state = SimulationState::empty([0; 16], 1);
        spawn_initial_crocodiles(&mut state);
        let stay = PlayerId([1; 16]);
        let go = PlayerId([2; 16]);
        state.add_player(stay);
        state.add_player(go);
        let fruit = add_fruit(&mut state, 1, from_int(200), 50).unwrap();
        let base = capture(&state);

        // One crocodile moves, a player leaves, the fruit is eaten
        let first_croc = *state.crocodiles.keys().next().unwrap();
        state.crocodiles.get_mut(&first_croc).unwrap().y += from_int(3);
        state.remove_player(&go);
        state.fruits.clear();
        state.tick = 1;
        let current = capture(&state);

        let delta = diff_snapshots(&base, &current).unwrap();
        assert_eq!(delta.base_tick, 0);
        assert_eq!(delta.tick, 1);
        assert_eq!(delta.crocodiles.len(), 1);
        assert_eq!(delta.crocodiles[0].id, first_croc);
        assert!(delta.players.is_empty());
        assert_eq!(delta.removed_players, vec![go.to_uuid_string()]);
        assert_eq!(delta.removed_fruits, vec![fruit]);
        assert!(delta.removed_crocodiles.is_empty());
    }

    #[test]
    fn test_new_entities_are_sent_whole() {
        let state = SimulationState::empty([0; 16], 1);
        let base = capture(&state);

        let mut next = state.clone();
        let id = PlayerId([7; 16]);
        next.add_player(id);
        let current = capture(&next);

        let delta = diff_snapshots(&base, &current).unwrap();
        assert_eq!(delta.players.len(), 1);
        assert_eq!(delta.players[0].session_id, id.to_uuid_string());

        let json = serde_json::to_string(&delta).unwrap();
        assert!(json.contains("\"baseTick\":0"));
        // Empty lists are left out
        assert!(!json.contains("removedFruits"));
    }
}

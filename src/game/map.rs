//! Jungle Map Geometry
//!
//! Vines, platforms, the water line and the goal. Vine `i` hangs at
//! `x = i` columns; `y` grows downward from the top of the screen.

use crate::core::fixed::{
    Fixed, from_int, to_fixed, fixed_abs,
    GROUND_Y, WATER_Y, GOAL_Y, VINE_GRAB_DISTANCE,
};
use crate::core::vec2::FixedVec2;

/// Number of vines in the standard layout.
pub const VINE_COUNT: u8 = 8;

/// Vine the player starts under.
pub const SPAWN_VINE: u8 = 1;

/// Vine that leads to the rescue.
pub const GOAL_VINE: u8 = 7;

/// A climbable vine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Vine {
    /// Column index
    pub index: u8,
    /// Column position (always `index` columns)
    pub x: Fixed,
    /// Highest reachable point
    pub top: Fixed,
    /// Lowest reachable point
    pub bottom: Fixed,
}

impl Vine {
    fn new(index: u8, top: i32, bottom: i32) -> Self {
        Self {
            index,
            x: from_int(index as i32),
            top: from_int(top),
            bottom: from_int(bottom),
        }
    }

    /// Whether `y` lies within the vine.
    #[inline]
    pub fn covers(&self, y: Fixed) -> bool {
        y >= self.top && y <= self.bottom
    }

    /// Whether a body at column `x` is close enough to hold on.
    #[inline]
    pub fn within_reach(&self, x: Fixed) -> bool {
        fixed_abs(x - self.x) <= VINE_GRAB_DISTANCE
    }
}

/// A horizontal surface a player can stand on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Platform {
    /// Surface height
    pub y: Fixed,
    /// Left edge (columns)
    pub left: Fixed,
    /// Right edge (columns)
    pub right: Fixed,
}

impl Platform {
    /// Whether column `x` is over this platform.
    #[inline]
    pub fn spans(&self, x: Fixed) -> bool {
        x >= self.left && x <= self.right
    }
}

/// The level layout shared by every match.
#[derive(Clone, Debug)]
pub struct JungleMap {
    vines: Vec<Vine>,
    platforms: Vec<Platform>,
    spawn: FixedVec2,
}

impl JungleMap {
    /// Build the standard layout.
    ///
    /// ```text
    ///  vine   0    1    2    3    4    5    6    7
    ///   top   80   80   80   80   80   80   60   20 ← goal at y ≤ 60
    ///  bottom 440  440  440  440  230  230  480  480
    ///         ═══════════════════     ═══ island y 250 (x 3.6..5.4)
    ///         ground y 475 (x 0..3.5)        ~~~ water below y 485
    /// ```
    pub fn new() -> Self {
        let vines = vec![
            Vine::new(0, 80, 440),
            Vine::new(1, 80, 440),
            Vine::new(2, 80, 440),
            Vine::new(3, 80, 440),
            Vine::new(4, 80, 230),
            Vine::new(5, 80, 230),
            Vine::new(6, 60, 480),
            Vine::new(7, 20, 480),
        ];

        let platforms = vec![
            Platform { y: GROUND_Y, left: 0, right: to_fixed(3.5) },
            Platform { y: from_int(250), left: to_fixed(3.6), right: to_fixed(5.4) },
        ];

        Self {
            vines,
            platforms,
            spawn: FixedVec2::new(from_int(SPAWN_VINE as i32), GROUND_Y),
        }
    }

    /// Look up a vine by index.
    pub fn vine(&self, index: u8) -> Option<&Vine> {
        self.vines.get(index as usize)
    }

    /// Vine at a signed index, for left/right switching.
    pub fn vine_at(&self, index: i32) -> Option<&Vine> {
        if index < 0 {
            return None;
        }
        self.vines.get(index as usize)
    }

    /// Number of vines.
    pub fn vine_count(&self) -> u8 {
        self.vines.len() as u8
    }

    /// All vines in column order.
    pub fn vines(&self) -> &[Vine] {
        &self.vines
    }

    /// Rightmost column a player can occupy.
    pub fn max_x(&self) -> Fixed {
        from_int(self.vines.len().saturating_sub(1) as i32)
    }

    /// Respawn position.
    pub fn spawn_point(&self) -> FixedVec2 {
        self.spawn
    }

    /// Vine a body at `(x, y)` can grab, if any.
    pub fn grabbable_vine(&self, x: Fixed, y: Fixed) -> Option<&Vine> {
        self.vines.iter().find(|v| v.within_reach(x) && v.covers(y))
    }

    /// Platform supporting a body standing at `(x, y)`.
    pub fn platform_at(&self, x: Fixed, y: Fixed) -> Option<&Platform> {
        self.platforms.iter().find(|p| p.y == y && p.spans(x))
    }

    /// First platform crossed while falling from `from_y` to `to_y` at column `x`.
    pub fn landing_platform(&self, x: Fixed, from_y: Fixed, to_y: Fixed) -> Option<&Platform> {
        self.platforms
            .iter()
            .filter(|p| p.spans(x) && p.y >= from_y && p.y <= to_y)
            .min_by_key(|p| p.y)
    }

    /// Whether `y` is below the water line.
    #[inline]
    pub fn is_underwater(&self, y: Fixed) -> bool {
        y >= WATER_Y
    }

    /// Whether a body at `(x, y)` has reached the rescue point.
    pub fn is_goal(&self, x: Fixed, y: Fixed) -> bool {
        match self.vine(GOAL_VINE) {
            Some(goal) => goal.within_reach(x) && y <= GOAL_Y,
            None => false,
        }
    }
}

impl Default for JungleMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let map = JungleMap::new();
        assert_eq!(map.vine_count(), VINE_COUNT);
        assert_eq!(map.max_x(), from_int(7));
        assert_eq!(map.spawn_point(), FixedVec2::new(from_int(1), GROUND_Y));
        assert!(map.platform_at(from_int(1), GROUND_Y).is_some());

        for (i, vine) in map.vines().iter().enumerate() {
            assert_eq!(vine.index as usize, i);
            assert!(vine.top < vine.bottom);
        }
    }

    #[test]
    fn test_grab_requires_reach_and_height() {
        let map = JungleMap::new();

        let vine = map.grabbable_vine(to_fixed(2.2), from_int(300));
        assert_eq!(vine.map(|v| v.index), Some(2));

        // Too far from any column
        assert!(map.grabbable_vine(to_fixed(2.5), from_int(300)).is_none());
        // Below the vine's end
        assert!(map.grabbable_vine(from_int(2), from_int(460)).is_none());
    }

    #[test]
    fn test_landing_picks_highest_crossed_platform() {
        let map = JungleMap::new();

        let island = map.landing_platform(from_int(4), from_int(240), from_int(260));
        assert_eq!(island.map(|p| p.y), Some(from_int(250)));

        let ground = map.landing_platform(from_int(1), from_int(470), from_int(480));
        assert_eq!(ground.map(|p| p.y), Some(GROUND_Y));

        // Nothing under the far vines
        assert!(map.landing_platform(from_int(6), from_int(400), from_int(499)).is_none());
    }

    #[test]
    fn test_goal_and_water() {
        let map = JungleMap::new();
        assert!(map.is_goal(from_int(7), from_int(40)));
        assert!(!map.is_goal(from_int(7), from_int(100)));
        assert!(!map.is_goal(from_int(6), from_int(40)));

        assert!(map.is_underwater(WATER_Y));
        assert!(!map.is_underwater(GROUND_Y));
    }

    #[test]
    fn test_vine_at_rejects_out_of_range() {
        let map = JungleMap::new();
        assert!(map.vine_at(-1).is_none());
        assert!(map.vine_at(8).is_none());
        assert_eq!(map.vine_at(3).map(|v| v.index), Some(3));
    }
}

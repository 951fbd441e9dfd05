//! Q16.16 Fixed-Point Arithmetic
//!
//! Deterministic fixed-point math for the platform simulation.
//! All gameplay arithmetic is integer-only; floats appear only when a
//! snapshot is rendered to JSON.
//!
//! ## Format: Q16.16
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Bit Layout: Q16.16 (32-bit signed integer)                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  [S][IIIIIIIIIIIIIIII][FFFFFFFFFFFFFFFF]                    │
//! │   │  └──── 16 bits ────┘└──── 16 bits ────┘                 │
//! │   └─ Sign bit                                               │
//! │                                                             │
//! │  Range: -32768.0 to +32767.99998 (approx)                   │
//! │  Precision: 1/65536 ≈ 0.000015 units                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The playfield is 500 screen units tall and 8 vine columns wide, and
//! the fastest quantity (gravity, 520 units/s²) stays far below the range.

/// Q16.16 fixed-point number stored as i32.
/// 16 bits integer, 16 bits fractional.
pub type Fixed = i32;

/// Number of fractional bits (16)
pub const FIXED_SCALE: i32 = 16;

/// 1.0 in fixed-point (65536)
pub const FIXED_ONE: Fixed = 1 << FIXED_SCALE; // 65536

/// 0.5 in fixed-point (32768)
pub const FIXED_HALF: Fixed = FIXED_ONE >> 1; // 32768

// =============================================================================
// GAME CONSTANTS (All as integer literals - NO float conversion!)
// =============================================================================

/// Maximum walking speed: 1.5 columns/sec = 1.5 * 65536 = 98304
pub const WALK_MAX_SPEED: Fixed = 98304;

/// Walking acceleration: 12.0 columns/sec² = 786432
pub const WALK_ACCELERATION: Fixed = 786432;

/// Ground friction: 10.0 columns/sec² = 655360
pub const WALK_FRICTION: Fixed = 655360;

/// Fraction of acceleration available in the air: 0.6 = 39321 (floor)
pub const AIR_CONTROL: Fixed = 39321;

/// Gravity: 520.0 units/sec² = 34078720
pub const GRAVITY: Fixed = 34078720;

/// Jump impulse from ground or vine: 220.0 units/sec = 14417920
pub const JUMP_VELOCITY: Fixed = 14417920;

/// Climbing speed on a vine: 180.0 units/sec = 11796480
pub const VINE_CLIMB_SPEED: Fixed = 11796480;

/// Horizontal distance within which a vine can be grabbed: 0.35 = 22937 (floor)
pub const VINE_GRAB_DISTANCE: Fixed = 22937;

/// Ground platform height: 475.0 = 31129600
pub const GROUND_Y: Fixed = 31129600;

/// Water level, anything below drowns: 485.0 = 31784960
pub const WATER_Y: Fixed = 31784960;

/// Bottom edge of the playfield: 500.0 = 32768000
pub const WORLD_BOTTOM: Fixed = 32768000;

/// Height that counts as reaching the goal: 60.0 = 3932160
pub const GOAL_Y: Fixed = 3932160;

/// Vertical distance for a crocodile hit: 30.0 = 1966080
pub const CROCODILE_HIT_DY: Fixed = 1966080;

/// Vertical distance for a fruit pickup: 24.0 = 1572864
pub const FRUIT_PICKUP_DY: Fixed = 1572864;

/// Red crocodile speeds: 60.0 and 70.0 units/sec
pub const RED_CROCODILE_SPEEDS: [Fixed; 2] = [
    3932160, // 60 * 65536
    4587520, // 70 * 65536
];

/// Blue crocodile speed: 50.0 units/sec = 3276800
pub const BLUE_CROCODILE_SPEED: Fixed = 3276800;

/// Difficulty growth per level: 1.10 = 72089 (floor)
pub const DIFFICULTY_STEP: Fixed = 72089;

/// Ceiling for the difficulty multiplier: 4.0 = 262144
pub const MAX_DIFFICULTY: Fixed = 262144;

/// Minimum spacing between fruits on one vine: 10.0 = 655360
pub const FRUIT_MIN_SPACING: Fixed = 655360;

/// Tolerance when deleting a fruit by position: 0.5
pub const FRUIT_DELETE_TOLERANCE: Fixed = FIXED_HALF;

/// Points for a rescue
pub const SCORE_PER_RESCUE: u32 = 100;

/// Default points for a fruit
pub const SCORE_PER_FRUIT: u32 = 50;

/// Lives at spawn
pub const STARTING_LIVES: u8 = 3;

// =============================================================================
// CORE OPERATIONS (All deterministic, wrapping semantics)
// =============================================================================

/// Convert a compile-time float to fixed-point.
///
/// # Warning
/// Only use at compile-time or initialization. NEVER in tick loop.
///
/// # Example
/// ```
/// use doncey_kong::core::fixed::{to_fixed, FIXED_ONE};
/// const MY_VALUE: i32 = to_fixed(2.5);
/// assert_eq!(MY_VALUE, FIXED_ONE * 2 + FIXED_ONE / 2);
/// ```
#[inline]
pub const fn to_fixed(f: f64) -> Fixed {
    (f * (FIXED_ONE as f64)) as Fixed
}

/// Convert an integer to fixed-point.
#[inline]
pub const fn from_int(i: i32) -> Fixed {
    i << FIXED_SCALE
}

/// Convert fixed-point to float for the wire format.
///
/// # Warning
/// Only use for snapshots and logs. NEVER use result in game logic.
#[inline]
pub fn to_float(f: Fixed) -> f64 {
    f as f64 / FIXED_ONE as f64
}

/// Multiply two fixed-point numbers.
///
/// Uses i64 intermediate to prevent overflow, then truncates.
#[inline]
pub fn fixed_mul(a: Fixed, b: Fixed) -> Fixed {
    let wide = (a as i64) * (b as i64);
    (wide >> FIXED_SCALE) as Fixed
}

/// Divide two fixed-point numbers.
///
/// Pre-shifts numerator to maintain precision.
/// Returns 0 on divide-by-zero.
#[inline]
pub fn fixed_div(a: Fixed, b: Fixed) -> Fixed {
    if b == 0 {
        return 0;
    }
    let wide = (a as i64) << FIXED_SCALE;
    (wide / b as i64) as Fixed
}

/// Absolute value of a fixed-point number.
#[inline]
pub fn fixed_abs(x: Fixed) -> Fixed {
    if x < 0 { x.wrapping_neg() } else { x }
}

/// Minimum of two fixed-point numbers.
#[inline]
pub fn fixed_min(a: Fixed, b: Fixed) -> Fixed {
    if a < b { a } else { b }
}

/// Maximum of two fixed-point numbers.
#[inline]
pub fn fixed_max(a: Fixed, b: Fixed) -> Fixed {
    if a > b { a } else { b }
}

/// Clamp a fixed-point number to a range.
#[inline]
pub fn fixed_clamp(value: Fixed, min: Fixed, max: Fixed) -> Fixed {
    fixed_max(min, fixed_min(max, value))
}

/// Move `current` toward `target` by at most `step`, never overshooting.
#[inline]
pub fn fixed_approach(current: Fixed, target: Fixed, step: Fixed) -> Fixed {
    if current < target {
        fixed_min(current.wrapping_add(step), target)
    } else {
        fixed_max(current.wrapping_sub(step), target)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_constants() {
        assert_eq!(FIXED_ONE, 65536);
        assert_eq!(FIXED_HALF, 32768);
        assert_eq!(FIXED_SCALE, 16);
    }

    #[test]
    fn test_to_fixed() {
        assert_eq!(to_fixed(1.0), FIXED_ONE);
        assert_eq!(to_fixed(0.5), FIXED_HALF);
        assert_eq!(to_fixed(-1.0), -FIXED_ONE);
        assert_eq!(from_int(7), 7 * FIXED_ONE);
    }

    #[test]
    fn test_fixed_mul_div() {
        assert_eq!(fixed_mul(to_fixed(2.0), to_fixed(3.0)), to_fixed(6.0));
        assert_eq!(fixed_mul(FIXED_HALF, FIXED_HALF), to_fixed(0.25));
        assert_eq!(fixed_mul(to_fixed(-2.0), to_fixed(3.0)), to_fixed(-6.0));

        assert_eq!(fixed_div(to_fixed(6.0), to_fixed(2.0)), to_fixed(3.0));
        assert_eq!(fixed_div(FIXED_ONE, to_fixed(4.0)), to_fixed(0.25));
        assert_eq!(fixed_div(FIXED_ONE, 0), 0);
    }

    #[test]
    fn test_game_constants() {
        assert_eq!(WALK_MAX_SPEED, to_fixed(1.5));
        assert_eq!(GRAVITY, from_int(520));
        assert_eq!(JUMP_VELOCITY, from_int(220));
        assert_eq!(VINE_CLIMB_SPEED, from_int(180));
        assert_eq!(GROUND_Y, from_int(475));
        assert_eq!(WATER_Y, from_int(485));
        assert_eq!(GOAL_Y, from_int(60));
        assert_eq!(RED_CROCODILE_SPEEDS[1], from_int(70));
        assert_eq!(BLUE_CROCODILE_SPEED, from_int(50));
        assert_eq!(VINE_GRAB_DISTANCE, to_fixed(0.35));
        assert_eq!(DIFFICULTY_STEP, to_fixed(1.1));
    }

    #[test]
    fn test_fixed_approach() {
        assert_eq!(fixed_approach(0, FIXED_ONE, FIXED_HALF), FIXED_HALF);
        assert_eq!(fixed_approach(FIXED_HALF, FIXED_ONE, FIXED_ONE), FIXED_ONE);
        assert_eq!(fixed_approach(FIXED_ONE, 0, FIXED_HALF), FIXED_HALF);
        assert_eq!(fixed_approach(-FIXED_HALF, 0, FIXED_ONE), 0);
    }

    #[test]
    fn test_fixed_clamp() {
        assert_eq!(fixed_clamp(from_int(9), 0, from_int(7)), from_int(7));
        assert_eq!(fixed_clamp(from_int(-1), 0, from_int(7)), 0);
        assert_eq!(fixed_clamp(FIXED_HALF, 0, FIXED_ONE), FIXED_HALF);
    }
}

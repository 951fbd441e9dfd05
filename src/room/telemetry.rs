//! Match Telemetry
//!
//! Counters kept by a match task and readable from any thread: crocodiles
//! created and removed, ticks run, and how long each tick took against
//! the interval it was scheduled for.
//!
//! Durations are stored in microseconds.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Live counters for one match.
#[derive(Debug)]
pub struct MatchTelemetry {
    crocodiles_created: AtomicU64,
    crocodiles_removed: AtomicU64,
    ticks: AtomicU64,
    total_tick_us: AtomicU64,
    last_tick_us: AtomicU64,
    max_tick_us: AtomicU64,
    last_interval_us: AtomicU64,
    expected_interval_us: u64,
    start_time: Instant,
}

/// Point-in-time copy of [`MatchTelemetry`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    /// Crocodiles placed since the match was created
    pub crocodiles_created: u64,
    /// Crocodiles that fell into the water
    pub crocodiles_removed: u64,
    /// Ticks executed
    pub ticks: u64,
    /// Summed tick work time
    pub total_tick_us: u64,
    /// Work time of the newest tick
    pub last_tick_us: u64,
    /// Slowest tick so far
    pub max_tick_us: u64,
    /// Gap between the starts of the two newest ticks
    pub last_interval_us: u64,
    /// Scheduled gap between ticks
    pub expected_interval_us: u64,
    /// Time since the match was created
    pub uptime_us: u64,
}

impl MatchTelemetry {
    /// Start counting for a match ticking every `expected_interval`.
    pub fn new(expected_interval: Duration) -> Self {
        Self {
            crocodiles_created: AtomicU64::new(0),
            crocodiles_removed: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            total_tick_us: AtomicU64::new(0),
            last_tick_us: AtomicU64::new(0),
            max_tick_us: AtomicU64::new(0),
            last_interval_us: AtomicU64::new(0),
            expected_interval_us: expected_interval.as_micros() as u64,
            start_time: Instant::now(),
        }
    }

    /// Count newly placed crocodiles.
    pub fn record_crocodiles_created(&self, count: usize) {
        self.crocodiles_created.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Count crocodiles gone from the board.
    pub fn record_crocodiles_removed(&self, count: usize) {
        self.crocodiles_removed.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record one tick: the time spent on it and the time since the previous
    /// tick started (`None` for the first tick).
    pub fn record_tick(&self, work: Duration, interval: Option<Duration>) {
        let us = work.as_micros() as u64;
        self.last_tick_us.store(us, Ordering::Relaxed);
        self.max_tick_us.fetch_max(us, Ordering::Relaxed);
        self.total_tick_us.fetch_add(us, Ordering::Relaxed);
        self.ticks.fetch_add(1, Ordering::Relaxed);
        if let Some(interval) = interval {
            self.last_interval_us.store(interval.as_micros() as u64, Ordering::Relaxed);
        }
    }

    /// Copy out the current values.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            crocodiles_created: self.crocodiles_created.load(Ordering::Relaxed),
            crocodiles_removed: self.crocodiles_removed.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            total_tick_us: self.total_tick_us.load(Ordering::Relaxed),
            last_tick_us: self.last_tick_us.load(Ordering::Relaxed),
            max_tick_us: self.max_tick_us.load(Ordering::Relaxed),
            last_interval_us: self.last_interval_us.load(Ordering::Relaxed),
            expected_interval_us: self.expected_interval_us,
            uptime_us: self.start_time.elapsed().as_micros() as u64,
        }
    }
}

impl TelemetrySnapshot {
    /// Crocodiles still on the board.
    pub fn active_crocodiles(&self) -> u64 {
        self.crocodiles_created.saturating_sub(self.crocodiles_removed)
    }

    /// Mean tick work time.
    pub fn average_tick_us(&self) -> u64 {
        if self.ticks == 0 {
            0
        } else {
            self.total_tick_us / self.ticks
        }
    }

    /// How far the newest tick interval was from the schedule. Positive is late.
    pub fn interval_deviation_us(&self) -> i64 {
        if self.last_interval_us == 0 {
            return 0;
        }
        self.last_interval_us as i64 - self.expected_interval_us as i64
    }

    /// Ticks per second since the match was created.
    pub fn ticks_per_second(&self) -> f64 {
        if self.uptime_us == 0 {
            0.0
        } else {
            self.ticks as f64 * 1_000_000.0 / self.uptime_us as f64
        }
    }

    /// Multi-line operator report.
    pub fn report(&self) -> String {
        let ms = |us: u64| us as f64 / 1000.0;
        let mut out = String::with_capacity(320);
        let _ = writeln!(out, "uptime: {:.1} s", self.uptime_us as f64 / 1_000_000.0);
        let _ = writeln!(out, "crocodiles created: {}", self.crocodiles_created);
        let _ = writeln!(out, "crocodiles removed: {}", self.crocodiles_removed);
        let _ = writeln!(out, "crocodiles active: {}", self.active_crocodiles());
        let _ = writeln!(out, "ticks: {}", self.ticks);
        let _ = writeln!(out, "average tps: {:.2}", self.ticks_per_second());
        let _ = writeln!(out, "average tick: {:.3} ms", ms(self.average_tick_us()));
        let _ = writeln!(out, "max tick: {:.3} ms", ms(self.max_tick_us));
        let _ = writeln!(
            out,
            "last tick: {:.3} ms (interval {:.3} ms, deviation {:+.3} ms)",
            ms(self.last_tick_us),
            ms(self.last_interval_us),
            self.interval_deviation_us() as f64 / 1000.0,
        );
        let _ = write!(out, "expected dt: {:.3} ms", ms(self.expected_interval_us));
        out
    }
}

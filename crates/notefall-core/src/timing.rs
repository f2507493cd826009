//! Timing primitives for the playback transport.
//!
//! This module provides the fundamental timing types used throughout
//! Notefall:
//!
//! - [`TickTime`] - Fixed-point transport time for precise schedule keys
//! - [`TransportClock`] - Pausable, seekable transport position source
//!
//! Every clock method takes the current [`Instant`] explicitly instead of
//! reading the system clock, so callers control time and tests stay
//! deterministic.

use std::time::Instant;

/// Fixed-point transport time with microsecond resolution.
///
/// Schedule entries are keyed by note start times, and floating-point
/// seconds make poor map keys. Rounding to the microsecond gives a
/// canonical grouping rule: two start times within half a microsecond of
/// each other map to the same key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TickTime {
    micros: i64,
}

impl TickTime {
    const SCALE: f64 = 1_000_000.0;

    /// Zero transport time constant.
    pub const ZERO: TickTime = TickTime { micros: 0 };

    /// Create a TickTime from a floating-point seconds value.
    #[inline]
    pub fn from_seconds(value: f64) -> Self {
        Self {
            micros: (value * Self::SCALE).round() as i64,
        }
    }

    /// Convert to floating-point seconds.
    #[inline]
    pub fn to_seconds(self) -> f64 {
        self.micros as f64 / Self::SCALE
    }

    /// The representable instant immediately before this one.
    ///
    /// Used as the "everything up to here has fired" cursor after a seek,
    /// so that an entry exactly at the seek target still fires.
    #[inline]
    pub fn previous(self) -> Self {
        Self {
            micros: self.micros.saturating_sub(1),
        }
    }
}

impl From<f64> for TickTime {
    fn from(value: f64) -> Self {
        TickTime::from_seconds(value)
    }
}

impl From<TickTime> for f64 {
    fn from(value: TickTime) -> Self {
        value.to_seconds()
    }
}

/// Transport clock mapping wall-clock instants to playback seconds.
///
/// The clock maintains an anchor point (playback position at a specific
/// instant). While running, the position advances in real time from the
/// anchor; while paused, it holds still. Seeking moves the anchor without
/// changing the running state.
///
/// Each player owns its clock outright. There is no shared process-wide
/// transport, so two players never interfere with each other.
#[derive(Clone, Debug)]
pub struct TransportClock {
    running: bool,
    anchor_instant: Instant,
    anchor_seconds: f64,
}

impl TransportClock {
    /// Create a clock stopped at position zero.
    pub fn new(now: Instant) -> Self {
        Self {
            running: false,
            anchor_instant: now,
            anchor_seconds: 0.0,
        }
    }

    /// Start the transport at the given instant.
    pub fn start(&mut self, now: Instant) {
        if !self.running {
            self.anchor_instant = now;
            self.running = true;
        }
    }

    /// Pause the transport, preserving the current position.
    pub fn pause(&mut self, now: Instant) {
        if self.running {
            self.anchor_seconds = self.seconds_at(now);
            self.running = false;
        }
    }

    /// Move the playback position without changing the running state.
    pub fn seek(&mut self, seconds: f64, now: Instant) {
        self.anchor_seconds = seconds.max(0.0);
        self.anchor_instant = now;
    }

    /// Calculate the playback position at a given instant.
    pub fn seconds_at(&self, time: Instant) -> f64 {
        if !self.running || time <= self.anchor_instant {
            return self.anchor_seconds;
        }
        self.anchor_seconds + time.duration_since(self.anchor_instant).as_secs_f64()
    }

    /// Check if the transport is running.
    pub fn is_running(&self) -> bool {
        self.running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_tick_time_roundtrip() {
        for val in [0.0, 0.5, 1.0, 2.125, 73.333, 600.0] {
            let tt = TickTime::from_seconds(val);
            assert!(
                (tt.to_seconds() - val).abs() < 1e-6,
                "roundtrip failed for {val}"
            );
        }
    }

    #[test]
    fn test_tick_time_groups_nearby_floats() {
        // Values that differ only past the microsecond share a key.
        let a = TickTime::from_seconds(0.5);
        let b = TickTime::from_seconds(0.5 + 1e-9);
        assert_eq!(a, b);

        let c = TickTime::from_seconds(0.500002);
        assert_ne!(a, c);
    }

    #[test]
    fn test_tick_time_previous_orders_below() {
        let t = TickTime::from_seconds(1.0);
        assert!(t.previous() < t);
        assert!(TickTime::ZERO.previous() < TickTime::ZERO);
    }

    #[test]
    fn test_clock_advances_while_running() {
        let base = Instant::now();
        let mut clock = TransportClock::new(base);
        clock.start(base);
        let later = base + Duration::from_millis(1500);
        assert!((clock.seconds_at(later) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_clock_holds_while_paused() {
        let base = Instant::now();
        let mut clock = TransportClock::new(base);
        clock.start(base);
        clock.pause(base + Duration::from_secs(2));
        let much_later = base + Duration::from_secs(60);
        assert!((clock.seconds_at(much_later) - 2.0).abs() < 1e-9);
        assert!(!clock.is_running());
    }

    #[test]
    fn test_clock_seek_preserves_running_state() {
        let base = Instant::now();
        let mut clock = TransportClock::new(base);

        clock.seek(3.0, base);
        assert!(!clock.is_running());
        assert!((clock.seconds_at(base) - 3.0).abs() < 1e-9);

        clock.start(base);
        clock.seek(10.0, base + Duration::from_secs(1));
        assert!(clock.is_running());
        let later = base + Duration::from_secs(3);
        assert!((clock.seconds_at(later) - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_clock_position_before_anchor_is_anchor() {
        let base = Instant::now();
        let mut clock = TransportClock::new(base + Duration::from_secs(5));
        clock.start(base + Duration::from_secs(5));
        assert!((clock.seconds_at(base) - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_clock_seek_clamps_negative() {
        let base = Instant::now();
        let mut clock = TransportClock::new(base);
        clock.seek(-4.0, base);
        assert!((clock.seconds_at(base) - 0.0).abs() < 1e-9);
    }
}

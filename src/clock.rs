// =============================================================================
// Clock — monotonic wall-clock source
// =============================================================================
//
// Every component that needs "now" goes through a `Clock` rather than calling
// `Utc::now()` directly, so the strategy runner and market feed can be driven
// deterministically in tests.
// =============================================================================

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;

/// Source of the current wall-clock instant, plus the derived
/// "minutes since local midnight" used by the `time` variable in predicates.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Minutes since local midnight for the given instant, in `self`'s
    /// configured timezone.
    fn minutes_since_midnight(&self, at: DateTime<Utc>) -> i64;

    /// Convenience: minutes since local midnight for `self.now()`.
    fn now_minutes(&self) -> i64 {
        self.minutes_since_midnight(self.now())
    }
}

/// Real wall-clock source, fixed to a single IANA timezone for the engine's
/// notion of "local time" (market open/close, the `time` predicate variable).
pub struct SystemClock {
    tz: Tz,
}

impl SystemClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn minutes_since_midnight(&self, at: DateTime<Utc>) -> i64 {
        let local = at.with_timezone(&self.tz);
        i64::from(local.hour()) * 60 + i64::from(local.minute())
    }
}

/// A clock whose `now()` is set explicitly. Used by tests that need
/// deterministic ticks and deterministic `time` predicate evaluation.
pub struct FixedClock {
    tz: Tz,
    current: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(tz: Tz, start: DateTime<Utc>) -> Self {
        Self {
            tz,
            current: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.current.lock() = at;
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.current.lock();
        *guard += delta;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock()
    }

    fn minutes_since_midnight(&self, at: DateTime<Utc>) -> i64 {
        let local = at.with_timezone(&self.tz);
        i64::from(local.hour()) * 60 + i64::from(local.minute())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn minutes_since_midnight_matches_local_wall_clock() {
        let clock = SystemClock::new(chrono_tz::UTC);
        let at = Utc.with_ymd_and_hms(2026, 7, 27, 15, 20, 0).unwrap();
        assert_eq!(clock.minutes_since_midnight(at), 15 * 60 + 20);
    }

    #[test]
    fn fixed_clock_advances_deterministically() {
        let start = Utc.with_ymd_and_hms(2026, 7, 27, 9, 30, 0).unwrap();
        let clock = FixedClock::new(chrono_tz::UTC, start);
        assert_eq!(clock.now_minutes(), 9 * 60 + 30);
        clock.advance(chrono::Duration::minutes(50));
        assert_eq!(clock.now_minutes(), 10 * 60 + 20);
    }
}

//! Session time sources.
//!
//! The scene loop only ever asks a [`Clock`] for monotonic elapsed time and
//! sleeps through it, so the same engine runs against the wall clock on a rig
//! and against virtual time in tests and accelerated simulations.

pub use core::time::Duration;
pub use std::time::Instant;

use chrono::{DateTime, Local, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};

pub trait Clock {
    /// Monotonic time since the clock was created.
    fn now(&self) -> Duration;

    /// Local wall-clock time, used for record timestamps and valid-time checks.
    fn wall_time(&self) -> DateTime<Local>;

    fn sleep(&mut self, d: Duration);
}

/// Real time. `sleep` blocks the calling thread.
#[derive(Debug, Clone)]
pub struct SystemClock {
    started_at: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn wall_time(&self) -> DateTime<Local> {
        Local::now()
    }

    fn sleep(&mut self, d: Duration) {
        std::thread::sleep(d);
    }
}

/// Virtual time that only moves when someone sleeps.
#[derive(Debug, Clone)]
pub struct ManualClock {
    elapsed: Duration,
    start: DateTime<Local>,
}

impl ManualClock {
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            elapsed: Duration::ZERO,
            start,
        }
    }

    pub fn advance(&mut self, d: Duration) {
        self.elapsed += d;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.elapsed
    }

    fn wall_time(&self) -> DateTime<Local> {
        let delta = TimeDelta::from_std(self.elapsed).unwrap_or(TimeDelta::MAX);
        self.start
            .checked_add_signed(delta)
            .unwrap_or(self.start)
    }

    fn sleep(&mut self, d: Duration) {
        self.advance(d);
    }
}

/// A daily time-of-day window in local time. `end < start` wraps midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= t && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }
}

/// Empty window lists mean "any time".
pub fn within_valid_times(windows: &[TimeWindow], t: NaiveTime) -> bool {
    windows.is_empty() || windows.iter().any(|w| w.contains(t))
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, FORMAT)
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn manual_clock_moves_only_on_sleep() {
        let start = Local.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap();
        let mut clock = ManualClock::new(start);
        assert_eq!(clock.now(), Duration::ZERO);
        clock.sleep(Duration::from_millis(1500));
        assert_eq!(clock.now(), Duration::from_millis(1500));
        assert_eq!(clock.wall_time().time(), hm(10, 0) + TimeDelta::milliseconds(1500));
    }

    #[test]
    fn windows_and_midnight_wrap() {
        let day = TimeWindow {
            start: hm(8, 0),
            end: hm(18, 0),
        };
        assert!(day.contains(hm(8, 0)));
        assert!(day.contains(hm(17, 59)));
        assert!(!day.contains(hm(18, 0)));

        let night = TimeWindow {
            start: hm(22, 0),
            end: hm(2, 0),
        };
        assert!(night.contains(hm(23, 30)));
        assert!(night.contains(hm(1, 0)));
        assert!(!night.contains(hm(12, 0)));

        assert!(within_valid_times(&[], hm(3, 0)));
        assert!(!within_valid_times(&[day], hm(3, 0)));
    }

    #[test]
    fn parses_hhmm() {
        let w: TimeWindow = serde_json::from_str(r#"{"start":"08:00","end":"18:30"}"#).unwrap();
        assert_eq!(w.end, hm(18, 30));
        let back = serde_json::to_string(&w).unwrap();
        assert_eq!(back, r#"{"start":"08:00","end":"18:30"}"#);
    }
}

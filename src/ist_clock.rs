//! Fixed UTC+5:30 wall clock: gate window and display timestamp.
//!
//! The projection is always computed from the UTC instant plus a constant
//! offset, so host time zone settings never leak into the result.

use std::sync::RwLock;

use chrono::{DateTime, FixedOffset, Timelike, Utc};

pub const IST_OFFSET_MINUTES: i32 = 330;

pub const GATE_OPEN_HOUR: i32 = 15;
pub const GATE_CLOSE_HOUR: i32 = 17;

/// Source of the current UTC instant.
pub trait Clock: Send + Sync + 'static {
    fn now_utc(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a settable instant.
#[derive(Debug)]
pub struct FixedClock {
    inner: RwLock<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            inner: RwLock::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        let mut guard = self
            .inner
            .write()
            .expect("fixed clock lock should not be poisoned");
        *guard = now;
    }
}

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self
            .inner
            .read()
            .expect("fixed clock lock should not be poisoned")
    }
}

pub fn ist_offset() -> FixedOffset {
    FixedOffset::east_opt(IST_OFFSET_MINUTES * 60).expect("+05:30 is a valid fixed offset")
}

pub fn to_ist(instant: DateTime<Utc>) -> DateTime<FixedOffset> {
    instant.with_timezone(&ist_offset())
}

/// Gate rule evaluated on the IST hour/minute of `instant`.
///
/// Open from 15:00 through the whole 17:00 minute; 17:01 is closed.
pub fn is_gate_open_at(instant: DateTime<Utc>) -> bool {
    let ist = to_ist(instant);
    let hour = ist.hour() as i32;
    let minute = ist.minute() as i32;

    (hour > GATE_OPEN_HOUR || (hour == GATE_OPEN_HOUR && minute >= 0))
        && (hour < GATE_CLOSE_HOUR || (hour == GATE_CLOSE_HOUR && minute == 0))
}

pub fn is_gate_open() -> bool {
    is_gate_open_at(Utc::now())
}

pub fn format_ist_timestamp_at(instant: DateTime<Utc>) -> String {
    to_ist(instant)
        .format("%Y-%m-%d %H:%M:%S [IST]")
        .to_string()
}

pub fn format_ist_timestamp() -> String {
    format_ist_timestamp_at(Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 6, 1, h, m, s).unwrap()
    }

    #[test]
    fn gate_boundary_table_matches_ist_minutes() {
        // IST = UTC + 05:30
        assert!(!is_gate_open_at(utc(9, 29, 59))); // 14:59:59
        assert!(is_gate_open_at(utc(9, 30, 0))); // 15:00:00
        assert!(is_gate_open_at(utc(11, 29, 0))); // 16:59:00
        assert!(is_gate_open_at(utc(11, 30, 0))); // 17:00:00
        assert!(is_gate_open_at(utc(11, 30, 59))); // 17:00:59
        assert!(!is_gate_open_at(utc(11, 31, 0))); // 17:01:00
    }

    #[test]
    fn gate_is_closed_overnight_and_in_the_morning() {
        assert!(!is_gate_open_at(utc(0, 0, 0))); // 05:30
        assert!(!is_gate_open_at(utc(18, 30, 0))); // 00:00 next day
        assert!(!is_gate_open_at(utc(12, 30, 0))); // 18:00
    }

    #[test]
    fn formats_known_instant() {
        assert_eq!(
            format_ist_timestamp_at(utc(9, 30, 0)),
            "2023-06-01 15:00:00 [IST]"
        );
    }

    #[test]
    fn formatting_rolls_over_the_date() {
        let instant = Utc.with_ymd_and_hms(2023, 12, 31, 20, 5, 7).unwrap();
        assert_eq!(format_ist_timestamp_at(instant), "2024-01-01 01:35:07 [IST]");
    }

    #[test]
    fn fixed_clock_can_be_moved() {
        let clock = FixedClock::new(utc(9, 0, 0));
        assert_eq!(clock.now_utc(), utc(9, 0, 0));
        clock.set(utc(10, 0, 0));
        assert_eq!(clock.now_utc(), utc(10, 0, 0));
    }
}

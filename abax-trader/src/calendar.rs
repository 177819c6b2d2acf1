//! Trading-session boundaries.

use chrono::{DateTime, NaiveTime, Utc};

/// Open/close times of the trading session, expressed in UTC.
#[derive(Clone, Copy, Debug)]
pub struct TradingCalendar {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl Default for TradingCalendar {
    fn default() -> Self {
        // US cash session in UTC
        Self {
            open: NaiveTime::from_hms_opt(13, 30, 0).expect("valid time"),
            close: NaiveTime::from_hms_opt(20, 0, 0).expect("valid time"),
        }
    }
}

impl TradingCalendar {
    /// Whether the instant falls inside the trading session.
    #[must_use]
    pub fn in_session(&self, at: DateTime<Utc>) -> bool {
        let time = at.time();
        time >= self.open && time < self.close
    }

    /// Whether the instant falls at or after the session close.
    #[must_use]
    pub fn after_close(&self, at: DateTime<Utc>) -> bool {
        at.time() >= self.close
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn session_bounds_are_half_open() {
        let calendar = TradingCalendar::default();
        let open = Utc.with_ymd_and_hms(2024, 1, 2, 13, 30, 0).single().unwrap();
        let close = Utc.with_ymd_and_hms(2024, 1, 2, 20, 0, 0).single().unwrap();
        assert!(calendar.in_session(open));
        assert!(!calendar.in_session(close));
        assert!(calendar.after_close(close));
        assert!(!calendar.after_close(open));
    }
}

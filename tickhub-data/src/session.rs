/// Trading session clock
///
/// Fixed daily open/close window in a fixed-offset market timezone,
/// Monday through Friday. All queries take the current instant as a
/// parameter so callers and tests control time explicitly.
use crate::config::HubConfig;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tracing::warn;

/// Session window calculator for one market.
#[derive(Debug, Clone)]
pub struct SessionClock {
    open: NaiveTime,
    close: NaiveTime,
    offset: FixedOffset,
}

/// Snapshot answering a trading-status request.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub trading_active: bool,
    pub trading_start: String,
    pub trading_end: String,
    pub current_time: String,
    pub is_market_day: bool,
}

impl SessionClock {
    pub fn new(open: NaiveTime, close: NaiveTime, offset: FixedOffset) -> Self {
        Self {
            open,
            close,
            offset,
        }
    }

    /// Build from configured "HH:MM" bounds and offset minutes, falling
    /// back to the standard 09:15-15:30 UTC+05:30 session on bad input.
    pub fn from_config(config: &HubConfig) -> Self {
        let open = NaiveTime::parse_from_str(&config.session_open, "%H:%M").unwrap_or_else(|_| {
            warn!(
                "unparseable session open '{}', using 09:15",
                config.session_open
            );
            NaiveTime::from_hms_opt(9, 15, 0).unwrap()
        });
        let close = NaiveTime::parse_from_str(&config.session_close, "%H:%M").unwrap_or_else(|_| {
            warn!(
                "unparseable session close '{}', using 15:30",
                config.session_close
            );
            NaiveTime::from_hms_opt(15, 30, 0).unwrap()
        });
        let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60).unwrap_or_else(|| {
            warn!(
                "offset {} minutes out of range, using +05:30",
                config.utc_offset_minutes
            );
            FixedOffset::east_opt(330 * 60).unwrap()
        });
        Self::new(open, close, offset)
    }

    /// Whether the session is open at `now`. Both bounds are inclusive.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.offset);
        if local.weekday().num_days_from_monday() >= 5 {
            return false;
        }
        let time = local.time();
        time >= self.open && time <= self.close
    }

    /// Today's date in the market timezone.
    pub fn market_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }

    /// Open and close of `date`'s session as epoch seconds.
    pub fn session_bounds(&self, date: NaiveDate) -> (i64, i64) {
        (
            self.local_to_epoch(date.and_time(self.open)),
            self.local_to_epoch(date.and_time(self.close)),
        )
    }

    /// The elapsed portion of `date`'s session as an epoch-second range,
    /// or `None` when that session has not opened yet at `now`.
    pub fn fetch_window(&self, date: NaiveDate, now: DateTime<Utc>) -> Option<(i64, i64)> {
        let (open, close) = self.session_bounds(date);
        let now_ts = now.timestamp();
        if now_ts < open {
            return None;
        }
        Some((open, close.min(now_ts)))
    }

    /// Status snapshot for trading-status requests and heartbeats.
    pub fn status(&self, now: DateTime<Utc>) -> SessionStatus {
        let local = now.with_timezone(&self.offset);
        SessionStatus {
            trading_active: self.is_open(now),
            trading_start: self.open.format("%H:%M").to_string(),
            trading_end: self.close.format("%H:%M").to_string(),
            current_time: local.to_rfc3339(),
            is_market_day: local.weekday().num_days_from_monday() < 5,
        }
    }

    // Epoch seconds of a wall-clock datetime in the market timezone.
    fn local_to_epoch(&self, naive: NaiveDateTime) -> i64 {
        naive.and_utc().timestamp() - i64::from(self.offset.local_minus_utc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn clock() -> SessionClock {
        SessionClock::from_config(&HubConfig::default())
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_session_open_midday() {
        // Wednesday 2024-01-10, 10:00 IST = 04:30 UTC
        assert!(clock().is_open(utc(2024, 1, 10, 4, 30, 0)));
    }

    #[test]
    fn test_session_bounds_are_inclusive() {
        let clock = clock();
        struct TestCase {
            now: DateTime<Utc>,
            open: bool,
        }

        let cases = vec![
            // TC0: exactly 09:15 IST
            TestCase {
                now: utc(2024, 1, 10, 3, 45, 0),
                open: true,
            },
            // TC1: one minute before open
            TestCase {
                now: utc(2024, 1, 10, 3, 44, 0),
                open: false,
            },
            // TC2: exactly 15:30 IST
            TestCase {
                now: utc(2024, 1, 10, 10, 0, 0),
                open: true,
            },
            // TC3: one second after close
            TestCase {
                now: utc(2024, 1, 10, 10, 0, 1),
                open: false,
            },
        ];

        for (index, test) in cases.into_iter().enumerate() {
            assert_eq!(
                clock.is_open(test.now),
                test.open,
                "TC{index} failed at {}",
                test.now
            );
        }
    }

    #[test]
    fn test_weekend_is_closed() {
        // Saturday 2024-01-13, 10:00 IST
        let now = utc(2024, 1, 13, 4, 30, 0);
        let clock = clock();
        assert!(!clock.is_open(now));

        let status = clock.status(now);
        assert!(!status.trading_active);
        assert!(!status.is_market_day);
    }

    #[test]
    fn test_fetch_window_before_open_is_none() {
        // 08:30 IST, same day
        let date = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        assert_eq!(clock().fetch_window(date, utc(2024, 1, 10, 3, 0, 0)), None);
    }

    #[test]
    fn test_fetch_window_clamps_to_now_mid_session() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let now = utc(2024, 1, 10, 4, 30, 0);
        let (from, to) = clock().fetch_window(date, now).unwrap();
        assert_eq!(from, utc(2024, 1, 10, 3, 45, 0).timestamp());
        assert_eq!(to, now.timestamp());
    }

    #[test]
    fn test_fetch_window_past_date_covers_full_session() {
        let clock = clock();
        let date = NaiveDate::from_ymd_opt(2024, 1, 9).unwrap();
        let now = utc(2024, 1, 10, 4, 30, 0);
        let (from, to) = clock.fetch_window(date, now).unwrap();
        assert_eq!((from, to), clock.session_bounds(date));
    }

    #[test]
    fn test_status_fields() {
        let status = clock().status(utc(2024, 1, 10, 4, 30, 0));
        assert!(status.trading_active);
        assert_eq!(status.trading_start, "09:15");
        assert_eq!(status.trading_end, "15:30");
        assert!(status.current_time.contains("+05:30"));
        assert!(status.is_market_day);
    }

    #[test]
    fn test_bad_config_falls_back_to_defaults() {
        let config = HubConfig {
            session_open: "open".to_string(),
            session_close: "9999".to_string(),
            utc_offset_minutes: 100_000,
            ..HubConfig::default()
        };
        let clock = SessionClock::from_config(&config);
        // Falls back to the standard session
        assert!(clock.is_open(utc(2024, 1, 10, 4, 30, 0)));
        assert_eq!(clock.status(utc(2024, 1, 10, 4, 30, 0)).trading_start, "09:15");
    }
}

//! Local-time derivation. The "peak hour" predicate is the only place local
//! hours are consulted anywhere in the pipeline — everything else is stored
//! and compared in UTC.

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};

/// True iff `timestamp`'s hour, in the fixed `offset_hours` local time, is a
/// member of `peak_hours_local`.
pub fn is_peak_hour(timestamp: DateTime<Utc>, offset_hours: i32, peak_hours_local: &[u32]) -> bool {
    let hour = local_hour(timestamp, offset_hours);
    peak_hours_local.contains(&hour)
}

/// The hour-of-day (0..24) of `timestamp` shifted by the fixed local offset.
pub fn local_hour(timestamp: DateTime<Utc>, offset_hours: i32) -> u32 {
    local_instant(timestamp, offset_hours).hour()
}

/// The calendar date of `timestamp` shifted by the fixed local offset.
pub fn local_date(timestamp: DateTime<Utc>, offset_hours: i32) -> NaiveDate {
    local_instant(timestamp, offset_hours).date_naive()
}

fn local_instant(timestamp: DateTime<Utc>, offset_hours: i32) -> DateTime<Utc> {
    timestamp + Duration::hours(offset_hours as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dt(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn peak_hour_boundary_is_half_open_ranges() {
        let peak = [6, 7, 8, 9, 16, 17, 18, 19];
        // offset 0 for simplicity of the boundary check itself.
        assert!(!is_peak_hour(dt(5), 0, &peak));
        assert!(is_peak_hour(dt(6), 0, &peak));
        assert!(is_peak_hour(dt(9), 0, &peak));
        assert!(!is_peak_hour(dt(10), 0, &peak));
        assert!(!is_peak_hour(dt(15), 0, &peak));
        assert!(is_peak_hour(dt(16), 0, &peak));
        assert!(is_peak_hour(dt(19), 0, &peak));
        assert!(!is_peak_hour(dt(20), 0, &peak));
    }

    #[test]
    fn offset_plus_seven_shifts_utc_midnight_into_peak() {
        // 2025-01-01T00:00:00Z + 7h = 07:00 local, which is peak.
        let peak = [6, 7, 8, 9, 16, 17, 18, 19];
        assert!(is_peak_hour(dt(0), 7, &peak));
    }

    #[test]
    fn offset_plus_seven_steady_state_example_is_not_peak() {
        // 06:00Z + 7h = 13:00 local, not peak.
        let peak = [6, 7, 8, 9, 16, 17, 18, 19];
        assert!(!is_peak_hour(dt(6), 7, &peak));
        assert_eq!(local_hour(dt(6), 7), 13);
    }

    #[test]
    fn local_date_rolls_over_at_offset_boundary() {
        // 2025-01-01T20:00:00Z + 7h = 2025-01-02T03:00 local.
        let d = local_date(dt(20), 7);
        assert_eq!(d, NaiveDate::from_ymd_opt(2025, 1, 2).unwrap());
    }
}

//! DOS packed date/time.
//!
//! The 16-bit encodings the guest sees in directory entries and file
//! handles:
//!
//! - `date = ((year - 1980) << 9) | (month << 5) | day`
//! - `time = (hour << 11) | (minute << 5) | (second / 2)`
//!
//! Conversion to and from host time goes through the local timezone,
//! matching what DOS programs expect to see on disk.

use std::time::SystemTime;

use chrono::{DateTime, Datelike, Local, NaiveDate, TimeZone, Timelike};

use crate::error::{DosError, DosResult};

/// Sentinel packed date used when the host cannot supply one.
pub const FALLBACK_DATE: u16 = 1;
/// Sentinel packed time used when the host cannot supply one.
pub const FALLBACK_TIME: u16 = 1;

/// Pack a calendar date. Years before 1980 clamp to 1980.
pub fn pack_date(year: u16, month: u16, day: u16) -> u16 {
    let year = year.max(1980);
    ((year - 1980) << 9) | (month << 5) | day
}

/// Pack a wall-clock time. Seconds are stored with 2-second resolution.
pub fn pack_time(hour: u16, minute: u16, second: u16) -> u16 {
    (hour << 11) | (minute << 5) | (second / 2)
}

/// Split a packed date into (year, month, day).
pub fn date_parts(date: u16) -> (u16, u16, u16) {
    ((date >> 9) + 1980, (date >> 5) & 0x0f, date & 0x1f)
}

/// Split a packed time into (hour, minute, second).
pub fn time_parts(time: u16) -> (u16, u16, u16) {
    (time >> 11, (time >> 5) & 0x3f, (time & 0x1f) * 2)
}

/// Pack a host timestamp into (date, time) using the local timezone.
pub fn pack_system_time(t: SystemTime) -> (u16, u16) {
    let local: DateTime<Local> = DateTime::from(t);
    let date = pack_date(
        local.year().clamp(1980, 1980 + 127) as u16,
        local.month() as u16,
        local.day() as u16,
    );
    let time = pack_time(
        local.hour() as u16,
        local.minute() as u16,
        local.second() as u16,
    );
    (date, time)
}

/// Convert a packed (date, time) pair back to a host timestamp.
///
/// Fails when the packed fields do not name a real calendar moment,
/// e.g. month 0 or day 35.
pub fn unpack_to_system_time(date: u16, time: u16) -> DosResult<SystemTime> {
    let (year, month, day) = date_parts(date);
    let (hour, minute, second) = time_parts(time);

    let naive = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .and_then(|d| d.and_hms_opt(hour as u32, minute as u32, second as u32))
        .ok_or(DosError::InvalidTimestamp)?;
    let local = Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or(DosError::InvalidTimestamp)?;
    Ok(SystemTime::from(local))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_date_layout() {
        // 1980-01-01 packs to the smallest legal date
        assert_eq!(pack_date(1980, 1, 1), (1 << 5) | 1);
        assert_eq!(pack_date(2000, 12, 31), (20 << 9) | (12 << 5) | 31);
    }

    #[test]
    fn test_pack_time_layout() {
        assert_eq!(pack_time(0, 0, 0), 0);
        assert_eq!(pack_time(23, 59, 58), (23 << 11) | (59 << 5) | 29);
    }

    #[test]
    fn test_round_trip() {
        for &(y, mo, d, h, mi, s) in &[
            (1980u16, 1u16, 1u16, 0u16, 0u16, 0u16),
            (1994, 6, 15, 13, 37, 42),
            (2020, 12, 31, 23, 59, 58),
        ] {
            let date = pack_date(y, mo, d);
            let time = pack_time(h, mi, s);
            assert_eq!(date_parts(date), (y, mo, d));
            // seconds truncate to even values
            assert_eq!(time_parts(time), (h, mi, s & !1));
        }
    }

    #[test]
    fn test_pre_1980_clamps() {
        assert_eq!(pack_date(1970, 1, 1), pack_date(1980, 1, 1));
    }

    #[test]
    fn test_system_time_round_trip() {
        let now = SystemTime::now();
        let (date, time) = pack_system_time(now);
        let back = unpack_to_system_time(date, time).unwrap();
        let (date2, time2) = pack_system_time(back);
        assert_eq!((date, time), (date2, time2));
    }

    #[test]
    fn test_unpack_rejects_garbage() {
        // month 0
        assert!(unpack_to_system_time(0, 0).is_err());
        // day 31 in february
        assert!(unpack_to_system_time(pack_date(1990, 2, 31), 0).is_err());
    }
}

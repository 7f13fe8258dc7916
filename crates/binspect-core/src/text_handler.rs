//! Display helpers and timestamp conversions
//!
//! A [`DisplayFn`] replaces the default display of a leaf, e.g. an integer
//! shown in hexadecimal or a 32-bit counter shown as a UNIX date.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Timelike};

use crate::error::{Error, Result};
use crate::types::Value;

/// Display override: receives the decoded value and the field size in bits
pub type DisplayFn = fn(&Value, u64) -> String;

/// Format a datetime like `2006-02-10 12:45:56.671000`
///
/// The fractional part only appears when it is non-zero.
pub fn human_datetime(dt: &NaiveDateTime) -> String {
    if dt.nanosecond() / 1000 == 0 {
        dt.format("%Y-%m-%d %H:%M:%S").to_string()
    } else {
        format!("{}.{:06}", dt.format("%Y-%m-%d %H:%M:%S"), dt.nanosecond() / 1000)
    }
}

/// Human file size: `"1 byte"`, `"9999 bytes"`, `"9.8 KB"`, ...
pub fn human_filesize_value(size: u64) -> String {
    if size < 10_000 {
        return if size == 1 { "1 byte".to_string() } else { format!("{} bytes", size) };
    }
    scaled(size as f64, 1024.0, &["KB", "MB", "GB", "TB"])
}

/// Human bit size: `"12 bits"`, `"1.5 Kbit"`, ...
pub fn human_bit_size_value(size: u64) -> String {
    if size < 1000 {
        return if size == 1 { "1 bit".to_string() } else { format!("{} bits", size) };
    }
    scaled(size as f64, 1000.0, &["Kbit", "Mbit", "Gbit", "Tbit"])
}

fn scaled(mut size: f64, divisor: f64, units: &[&str]) -> String {
    let mut unit = units[0];
    for &candidate in units {
        unit = candidate;
        size /= divisor;
        if size < divisor {
            return format!("{:.1} {}", size, unit);
        }
    }
    format!("{} {}", size as u64, unit)
}

/// Human duration, at most three units: `"2 hours 3 min 5 sec"`
pub fn human_duration(delta: &TimeDelta) -> String {
    let millis_total = delta.num_milliseconds().max(0);
    let millis = millis_total % 1000;
    let total_seconds = millis_total / 1000;
    let seconds = total_seconds % 60;
    let minutes = (total_seconds / 60) % 60;
    let hours = (total_seconds / 3600) % 24;
    let total_days = total_seconds / 86_400;
    let days = total_days % 365;
    let years = total_days / 365;

    let plural = |n: i64, unit: &str| {
        if n == 1 { format!("1 {}", unit) } else { format!("{} {}s", n, unit) }
    };
    let mut parts = Vec::new();
    if years != 0 {
        parts.push(plural(years, "year"));
    }
    if days != 0 {
        parts.push(plural(days, "day"));
    }
    if hours != 0 {
        parts.push(plural(hours, "hour"));
    }
    if minutes != 0 {
        parts.push(format!("{} min", minutes));
    }
    if seconds != 0 {
        parts.push(format!("{} sec", seconds));
    }
    if millis != 0 {
        parts.push(format!("{} ms", millis));
    }
    if parts.is_empty() {
        return "0 ms".to_string();
    }
    parts.truncate(3);
    parts.join(" ")
}

fn epoch(year: i32, month: u32, day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Seconds since 1970-01-01, valid for 0 to 2^31 - 1
pub fn unix_to_datetime(value: i64) -> Result<NaiveDateTime> {
    if !(0..=0x7FFF_FFFF).contains(&value) {
        return Err(Error::parser(format!("invalid UNIX timestamp ({})", value)));
    }
    DateTime::from_timestamp(value, 0)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| Error::parser(format!("invalid UNIX timestamp ({})", value)))
}

/// Seconds since 1904-01-01 (classic Mac OS and QuickTime)
pub fn mac32_to_datetime(value: u64) -> Result<NaiveDateTime> {
    if value > u64::from(u32::MAX) {
        return Err(Error::parser(format!("invalid Mac timestamp ({})", value)));
    }
    Ok(epoch(1904, 1, 1) + TimeDelta::seconds(value as i64))
}

/// Units of 100 ns since 1601-01-01, limited to year 9999
pub fn win64_to_datetime(value: u64) -> Result<NaiveDateTime> {
    let invalid = || Error::parser(format!("invalid date (value={})", value));
    let micros = i64::try_from(value / 10).map_err(|_| invalid())?;
    let dt = epoch(1601, 1, 1)
        .checked_add_signed(TimeDelta::microseconds(micros))
        .ok_or_else(invalid)?;
    if dt > epoch(9999, 12, 31) + TimeDelta::days(1) - TimeDelta::microseconds(1) {
        return Err(invalid());
    }
    Ok(dt)
}

/// MS-DOS packed date/time: low word is the time, high word the date
///
/// Time: seconds/2 (bits 0-4), minutes (5-10), hours (11-15).
/// Date: day (bits 0-4), month (5-8), years since 1980 (9-15).
pub fn msdos_to_datetime(value: u32) -> Result<NaiveDateTime> {
    let time = value & 0xFFFF;
    let date = value >> 16;
    let second = (time & 0x1F) * 2;
    let minute = (time >> 5) & 0x3F;
    let hour = time >> 11;
    let day = date & 0x1F;
    let month = (date >> 5) & 0x0F;
    let year = 1980 + (date >> 9) as i32;
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .ok_or_else(|| Error::parser(format!("invalid MSDOS datetime (0x{:08x})", value)))
}

/// Duration in units of 100 ns
pub fn win64_to_duration(value: u64) -> TimeDelta {
    TimeDelta::microseconds(i64::try_from(value / 10).unwrap_or(i64::MAX))
}

/// Lowercase hexadecimal padded to the field width: `0x019c`
pub fn hexadecimal(value: &Value, size: u64) -> String {
    let digits = size.div_ceil(4) as usize;
    match value.as_u64() {
        Some(v) => format!("0x{:0width$x}", v, width = digits),
        None => value.to_string(),
    }
}

/// Display an integer field as a file size
pub fn human_filesize(value: &Value, _size: u64) -> String {
    match value.as_u64() {
        Some(v) => human_filesize_value(v),
        None => value.to_string(),
    }
}

/// Display an integer field as a bit size
pub fn human_bit_size(value: &Value, _size: u64) -> String {
    match value.as_u64() {
        Some(v) => human_bit_size_value(v),
        None => value.to_string(),
    }
}

/// Display a 32-bit integer as a UNIX timestamp
pub fn timestamp_unix(value: &Value, _size: u64) -> String {
    let raw = match value {
        Value::DateTime(dt) => return human_datetime(dt),
        other => other.as_i64().unwrap_or(-1),
    };
    match unix_to_datetime(raw) {
        Ok(dt) => human_datetime(&dt),
        Err(_) => format!("invalid UNIX timestamp ({})", raw),
    }
}

/// Display a 32-bit integer as a Mac timestamp
pub fn timestamp_mac32(value: &Value, _size: u64) -> String {
    match value {
        Value::DateTime(dt) => human_datetime(dt),
        other => match other.as_u64().map(mac32_to_datetime) {
            Some(Ok(dt)) => human_datetime(&dt),
            _ => format!("invalid Mac timestamp ({})", other),
        },
    }
}

/// Display a 64-bit integer as a Windows FILETIME
pub fn timestamp_win64(value: &Value, _size: u64) -> String {
    match value {
        Value::DateTime(dt) => human_datetime(dt),
        other => match other.as_u64() {
            Some(0) => "(not set)".to_string(),
            Some(v) => match win64_to_datetime(v) {
                Ok(dt) => human_datetime(&dt),
                Err(_) => format!("invalid date (value={})", v),
            },
            None => other.to_string(),
        },
    }
}

/// Display a 32-bit integer as an MS-DOS date/time
pub fn timestamp_msdos(value: &Value, _size: u64) -> String {
    match value {
        Value::DateTime(dt) => human_datetime(dt),
        other => match other.as_u64().and_then(|v| u32::try_from(v).ok()) {
            Some(v) => match msdos_to_datetime(v) {
                Ok(dt) => human_datetime(&dt),
                Err(err) => err.to_string(),
            },
            None => other.to_string(),
        },
    }
}

/// Display an integer number of milliseconds as a duration
pub fn duration_milliseconds(value: &Value, _size: u64) -> String {
    match value.as_i64() {
        Some(ms) => human_duration(&TimeDelta::milliseconds(ms)),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hexadecimal() {
        assert_eq!(hexadecimal(&Value::UInt(412), 16), "0x019c");
        assert_eq!(hexadecimal(&Value::UInt(0), 32), "0x00000000");
        assert_eq!(hexadecimal(&Value::UInt(5), 3), "0x5");
    }

    #[test]
    fn test_human_filesize() {
        assert_eq!(human_filesize_value(1), "1 byte");
        assert_eq!(human_filesize_value(9999), "9999 bytes");
        assert_eq!(human_filesize_value(10_240), "10.0 KB");
        assert_eq!(human_filesize_value(3 * 1024 * 1024), "3.0 MB");
        assert_eq!(human_bit_size_value(12), "12 bits");
        assert_eq!(human_bit_size_value(1500), "1.5 Kbit");
    }

    #[test]
    fn test_unix_timestamps() {
        assert_eq!(timestamp_unix(&Value::UInt(0), 32), "1970-01-01 00:00:00");
        assert_eq!(timestamp_unix(&Value::UInt(1_154_175_644), 32), "2006-07-29 12:20:44");
        assert_eq!(
            timestamp_unix(&Value::UInt(2_147_483_650), 32),
            "invalid UNIX timestamp (2147483650)"
        );
    }

    #[test]
    fn test_mac_timestamp() {
        assert_eq!(timestamp_mac32(&Value::UInt(2_843_043_290), 32), "1994-02-02 14:14:50");
    }

    #[test]
    fn test_win64_timestamp() {
        assert_eq!(
            timestamp_win64(&Value::UInt(127_840_491_566_710_000), 64),
            "2006-02-10 12:45:56.671000"
        );
        assert_eq!(timestamp_win64(&Value::UInt(0), 64), "(not set)");
        assert_eq!(
            timestamp_win64(&Value::UInt(u64::MAX), 64),
            "invalid date (value=18446744073709551615)"
        );
    }

    #[test]
    fn test_msdos_timestamp() {
        // 2019-01-01 09:00:00
        let value = (0x4E21u32 << 16) | 0x4800;
        let dt = msdos_to_datetime(value).unwrap();
        assert_eq!(human_datetime(&dt), "2019-01-01 09:00:00");
        assert!(msdos_to_datetime(0).is_err());
    }

    #[test]
    fn test_human_duration() {
        assert_eq!(human_duration(&TimeDelta::zero()), "0 ms");
        assert_eq!(human_duration(&TimeDelta::milliseconds(1500)), "1 sec 500 ms");
        assert_eq!(
            human_duration(&TimeDelta::seconds(2 * 3600 + 3 * 60 + 5)),
            "2 hours 3 min 5 sec"
        );
        assert_eq!(human_duration(&TimeDelta::days(366)), "1 year 1 day");
    }
}

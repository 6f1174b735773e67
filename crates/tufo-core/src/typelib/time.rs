//! Time parsing and rendering for the `time` kind.
//!
//! Times are UTC epoch milliseconds. Strings are reduced to their digits and
//! read by length: `YYYY`, `YYYYMM`, `YYYYMMDD`, `YYYYMMDDhh`,
//! `YYYYMMDDhhmm`, `YYYYMMDDhhmmss` or `YYYYMMDDhhmmssmmm`. Any separators
//! (`-`, `/`, `:`, `.`, ` `, `T`) are ignored.

use chrono::{DateTime, NaiveDate, Utc};

/// The current time in epoch milliseconds.
#[must_use]
pub fn now() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parse a time string into epoch milliseconds.
pub fn parse(text: &str) -> Result<i64, String> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("now") {
        return Ok(now());
    }

    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(format!("no digits in time string {:?}", text));
    }

    let field = |start: usize, len: usize, default: u32| -> Result<u32, String> {
        match digits.get(start..start + len) {
            Some(part) => part
                .parse::<u32>()
                .map_err(|e| format!("bad time field {:?}: {}", part, e)),
            None => Ok(default),
        }
    };

    if !matches!(digits.len(), 4 | 6 | 8 | 10 | 12 | 14 | 17) {
        return Err(format!("unrecognized time format {:?}", text));
    }

    let year = digits
        .get(0..4)
        .and_then(|y| y.parse::<i32>().ok())
        .ok_or_else(|| format!("bad year in {:?}", text))?;
    let month = field(4, 2, 1)?;
    let day = field(6, 2, 1)?;
    let hour = field(8, 2, 0)?;
    let minute = field(10, 2, 0)?;
    let second = field(12, 2, 0)?;
    let milli = field(14, 3, 0)?;

    let date = NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| format!("invalid date in {:?}", text))?;
    let stamp = date
        .and_hms_milli_opt(hour, minute, second, milli)
        .ok_or_else(|| format!("invalid time of day in {:?}", text))?;

    Ok(stamp.and_utc().timestamp_millis())
}

/// Render epoch milliseconds as `YYYY/MM/DD hh:mm:ss.mmm`.
pub fn repr(millis: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(millis) {
        Some(dt) => dt.format("%Y/%m/%d %H:%M:%S%.3f").to_string(),
        None => millis.to_string(),
    }
}

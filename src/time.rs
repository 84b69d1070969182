//! Wall-clock time source and the RFC 3339 collaborator (spec.md §4.1, §6).
//!
//! `validate_rfc3339`/`rfc3339_to_timestamp`/`timestamp_to_rfc3339_*` mirror
//! the strict grammar habitat's own RFC 3339 helper enforces: leap seconds
//! and out-of-range offsets are rejected, a fractional-second suffix is
//! accepted on input and truncated (never rounded, never re-emitted).

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, TimeZone, Timelike};

/// Source of wall-clock time, injected so the merge loop's retry timestamps
/// are deterministically testable (mirrors the original connector's test
/// harness, which drives the uploader from a fake, advanceable clock).
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch.
    fn now(&self) -> i64;
}

/// The real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// A settable clock for tests. Advances only when told to, like the
/// `Callbacks.fake_time` harness in the original test suite.
#[derive(Debug)]
pub struct FakeClock(std::sync::atomic::AtomicI64);

impl FakeClock {
    pub fn new(start: i64) -> Self {
        FakeClock(std::sync::atomic::AtomicI64::new(start))
    }

    pub fn advance(&self, seconds: i64) {
        self.0.fetch_add(seconds, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> i64 {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// An invalid RFC 3339 string was supplied or encountered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid RFC 3339 timestamp")]
pub struct InvalidFormat;

struct Parsed {
    date: NaiveDate,
    hour: u32,
    minute: u32,
    second: u32,
    offset_seconds: i32,
}

/// Validate a string against the strict RFC 3339 grammar this crate accepts.
pub fn validate_rfc3339(s: &str) -> bool {
    parse(s).is_ok()
}

/// Parse an RFC 3339 string to a Unix-epoch second count.
///
/// A fractional-second suffix is accepted and truncated, not rounded.
pub fn rfc3339_to_timestamp(s: &str) -> Result<i64, InvalidFormat> {
    let p = parse(s)?;
    let naive: NaiveDateTime = p
        .date
        .and_hms_opt(p.hour, p.minute, p.second)
        .ok_or(InvalidFormat)?;
    Ok(naive.and_utc().timestamp() - i64::from(p.offset_seconds))
}

/// Format a Unix-epoch second count as RFC 3339 with a `Z` (zero) offset.
pub fn timestamp_to_rfc3339_utcoffset(timestamp: i64) -> String {
    format_with_offset(timestamp, 0)
}

/// Format a Unix-epoch second count as RFC 3339 using the system's current
/// local UTC offset.
///
/// Per spec.md §4.2, an implementation may emit either `Z` or `±HH:MM`; this
/// function emits `Z` exactly when the local offset is zero.
pub fn timestamp_to_rfc3339_localoffset(timestamp: i64) -> String {
    let offset_seconds = Local
        .timestamp_opt(timestamp, 0)
        .single()
        .map(|dt| dt.offset().local_minus_utc())
        .unwrap_or(0);
    format_with_offset(timestamp, offset_seconds)
}

fn format_with_offset(timestamp: i64, offset_seconds: i32) -> String {
    let naive = chrono::DateTime::from_timestamp(timestamp + i64::from(offset_seconds), 0)
        .expect("timestamp in range")
        .naive_utc();

    if offset_seconds == 0 {
        format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
            naive.year(),
            naive.month(),
            naive.day(),
            naive.hour(),
            naive.minute(),
            naive.second()
        )
    } else {
        let sign = if offset_seconds < 0 { '-' } else { '+' };
        let abs = offset_seconds.unsigned_abs();
        let off_h = abs / 3600;
        let off_m = (abs % 3600) / 60;
        format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}{sign}{off_h:02}:{off_m:02}",
            naive.year(),
            naive.month(),
            naive.day(),
            naive.hour(),
            naive.minute(),
            naive.second()
        )
    }
}

fn parse(s: &str) -> Result<Parsed, InvalidFormat> {
    let bytes = s.as_bytes();
    if bytes.len() < 20 {
        return Err(InvalidFormat);
    }

    let digit = |i: usize| -> Result<u32, InvalidFormat> {
        bytes
            .get(i)
            .filter(|b| b.is_ascii_digit())
            .map(|b| u32::from(*b - b'0'))
            .ok_or(InvalidFormat)
    };
    let two = |i: usize| -> Result<u32, InvalidFormat> { Ok(digit(i)? * 10 + digit(i + 1)?) };

    if bytes[4] != b'-' || bytes[7] != b'-' || (bytes[10] != b'T' && bytes[10] != b't') {
        return Err(InvalidFormat);
    }
    let year = digit(0)? * 1000 + digit(1)? * 100 + digit(2)? * 10 + digit(3)?;
    let month = two(5)?;
    let day = two(8)?;

    if bytes[13] != b':' || bytes[16] != b':' {
        return Err(InvalidFormat);
    }
    let hour = two(11)?;
    let minute = two(14)?;
    let second = two(17)?;

    if hour > 23 || minute > 59 || second > 59 {
        // Leap seconds (second == 60) are rejected here too.
        return Err(InvalidFormat);
    }

    let date = NaiveDate::from_ymd_opt(year as i32, month, day).ok_or(InvalidFormat)?;

    let mut rest = &s[19..];
    if let Some(stripped) = rest.strip_prefix('.') {
        let frac_len = stripped
            .bytes()
            .take_while(u8::is_ascii_digit)
            .count();
        if frac_len == 0 {
            return Err(InvalidFormat);
        }
        rest = &stripped[frac_len..];
    }

    let offset_seconds = parse_offset(rest)?;

    Ok(Parsed {
        date,
        hour,
        minute,
        second,
        offset_seconds,
    })
}

fn parse_offset(s: &str) -> Result<i32, InvalidFormat> {
    if s == "Z" || s == "z" {
        return Ok(0);
    }
    let bytes = s.as_bytes();
    if bytes.len() != 6 {
        return Err(InvalidFormat);
    }
    let sign = match bytes[0] {
        b'+' => 1,
        b'-' => -1,
        _ => return Err(InvalidFormat),
    };
    if bytes[3] != b':' {
        return Err(InvalidFormat);
    }
    let digit = |i: usize| -> Result<i32, InvalidFormat> {
        bytes
            .get(i)
            .filter(|b| b.is_ascii_digit())
            .map(|b| i32::from(*b - b'0'))
            .ok_or(InvalidFormat)
    };
    let hours = digit(1)? * 10 + digit(2)?;
    let minutes = digit(4)? * 10 + digit(5)?;
    if hours > 23 || minutes > 59 {
        return Err(InvalidFormat);
    }
    Ok(sign * (hours * 3600 + minutes * 60))
}

//! Human-Readable Duration Text
//!
//! Line recycle timeouts are persisted as text (`"30s"`, `"2m"`,
//! `"100ms"`, `"1m30s"`) so operators can read and write them directly
//! in the coordinator and in stats output. This module converts between
//! that text and `std::time::Duration`.
//!
//! The accepted grammar is a sequence of `<number><unit>` terms where
//! the number may carry a decimal fraction and the unit is one of
//! `ns`, `us`, `µs`, `ms`, `s`, `m`, `h`. A bare `"0"` is also accepted.
//! Formatting always produces text this parser round-trips.

use std::time::Duration;

use crate::error::{Error, Result};

const NANOS_PER_US: u128 = 1_000;
const NANOS_PER_MS: u128 = 1_000_000;
const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Format a duration as human-readable text.
///
/// Sub-second durations pick the coarsest unit that loses nothing
/// (`"100ms"`, `"250us"`); second-and-above durations decompose into
/// hours, minutes, and seconds with zero components omitted (`"2m"`,
/// `"1m30s"`, `"1h5s"`).
pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos % NANOS_PER_SEC != 0 {
        return if nanos % NANOS_PER_MS == 0 {
            format!("{}ms", nanos / NANOS_PER_MS)
        } else if nanos % NANOS_PER_US == 0 {
            format!("{}us", nanos / NANOS_PER_US)
        } else {
            format!("{nanos}ns")
        };
    }

    let secs = nanos / NANOS_PER_SEC;
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{h}h"));
    }
    if m > 0 {
        out.push_str(&format!("{m}m"));
    }
    if s > 0 || out.is_empty() {
        out.push_str(&format!("{s}s"));
    }
    out
}

/// Parse human-readable duration text.
pub fn parse_duration(text: &str) -> Result<Duration> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::BadRequest("empty duration".to_string()));
    }
    if text == "0" {
        return Ok(Duration::ZERO);
    }

    let bad = |msg: &str| Error::BadRequest(format!("duration {text:?}: {msg}"));

    let mut total_nanos: u128 = 0;
    let mut rest = text;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| bad("missing unit"))?;
        if num_end == 0 {
            return Err(bad("missing number"));
        }
        let number: f64 = rest[..num_end]
            .parse()
            .map_err(|_| bad("unparsable number"))?;
        rest = &rest[num_end..];

        let (unit_nanos, unit_len) = if rest.starts_with("ns") {
            (1u128, 2)
        } else if rest.starts_with("us") {
            (NANOS_PER_US, 2)
        } else if rest.starts_with("µs") {
            (NANOS_PER_US, "µs".len())
        } else if rest.starts_with("ms") {
            (NANOS_PER_MS, 2)
        } else if rest.starts_with('s') {
            (NANOS_PER_SEC, 1)
        } else if rest.starts_with('m') {
            (60 * NANOS_PER_SEC, 1)
        } else if rest.starts_with('h') {
            (3600 * NANOS_PER_SEC, 1)
        } else {
            return Err(bad("unknown unit"));
        };
        rest = &rest[unit_len..];

        if !number.is_finite() || number < 0.0 {
            return Err(bad("negative or non-finite number"));
        }
        total_nanos += (number * unit_nanos as f64).round() as u128;
    }

    let nanos64 = u64::try_from(total_nanos).map_err(|_| bad("overflow"))?;
    Ok(Duration::from_nanos(nanos64))
}

//! Parse individual trace lines back into `TraceRecord`s.
//!
//! Supports the two line formats written by the simulation:
//!
//! ```text
//! 3.01s: Throughput = 97.4802 Mbps
//! 34.9783s: SNR = 32.3951 dB
//! ```
//!
//! Keywords and units are matched case-insensitively and whitespace around
//! every token is ignored. Anything else (framework log output, headers)
//! yields `None`.

use crate::simulation::time::SimTime;
use crate::simulation::trace::{SnrSample, ThroughputSample, TraceRecord};

/// Parse a trace line.
///
/// # Returns
///
/// `Some(record)` for a throughput or SNR line, `None` for unparseable lines.
pub fn parse_trace_line(line: &str) -> Option<TraceRecord> {
    let (time_part, rest) = line.trim().split_once(':')?;
    let time = parse_time(time_part)?;

    let (key, value) = rest.split_once('=')?;
    let key = key.trim();
    if key.eq_ignore_ascii_case("throughput") {
        let mbps = parse_value_with_unit(value, "mbps")?;
        Some(TraceRecord::Throughput(ThroughputSample { time, mbps }))
    } else if key.eq_ignore_ascii_case("snr") {
        let snr_db = parse_value_with_unit(value, "db")?;
        Some(TraceRecord::Snr(SnrSample { time, snr_db }))
    } else {
        None
    }
}

/// Parse `"<seconds>s"` into a virtual timestamp.
fn parse_time(text: &str) -> Option<SimTime> {
    let number = strip_suffix_ignore_case(text.trim(), "s")?;
    let seconds: f64 = number.trim_end().parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(SimTime::from_secs_f64(seconds))
}

/// Parse `"<number> <unit>"`, requiring the given unit.
fn parse_value_with_unit(text: &str, unit: &str) -> Option<f64> {
    let number = strip_suffix_ignore_case(text.trim(), unit)?;
    number.trim().parse().ok()
}

fn strip_suffix_ignore_case<'a>(text: &'a str, suffix: &str) -> Option<&'a str> {
    let split = text.len().checked_sub(suffix.len())?;
    if !text.is_char_boundary(split) {
        return None;
    }
    let (head, tail) = text.split_at(split);
    tail.eq_ignore_ascii_case(suffix).then_some(head)
}

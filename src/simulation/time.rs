//! Virtual time for the discrete-event core.
//!
//! Time is kept in integer nanoseconds so that repeated scheduling of short
//! inter-arrival gaps (tens of microseconds at hundreds of Mb/s) never drifts
//! the way accumulated floating point seconds would.
//!
//! - `SimTime`: absolute virtual time since the start of the run, never negative
//! - `SimDuration`: signed offset, so a negative delay can be expressed and rejected

use std::fmt;
use std::ops::{Add, Sub};

const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

/// Absolute virtual time in nanoseconds since simulation start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimTime(u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);
    pub const MAX: SimTime = SimTime(u64::MAX);

    pub const fn from_nanos(nanos: u64) -> Self {
        SimTime(nanos)
    }

    pub const fn from_millis(millis: u64) -> Self {
        SimTime(millis * 1_000_000)
    }

    /// Convert seconds to virtual time, rounding to the nearest nanosecond.
    /// Negative and NaN inputs saturate to zero.
    pub fn from_secs_f64(secs: f64) -> Self {
        if !(secs > 0.0) {
            return SimTime::ZERO;
        }
        SimTime((secs * NANOS_PER_SECOND).round().min(u64::MAX as f64) as u64)
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / NANOS_PER_SECOND
    }

    /// `self + delay`, or `None` if the result would be negative or overflow.
    pub fn checked_add(self, delay: SimDuration) -> Option<SimTime> {
        if delay.0 >= 0 {
            self.0.checked_add(delay.0 as u64).map(SimTime)
        } else {
            self.0.checked_sub(delay.0.unsigned_abs()).map(SimTime)
        }
    }

    /// Signed distance from `earlier` to `self`.
    pub fn duration_since(self, earlier: SimTime) -> SimDuration {
        SimDuration((self.0 as i128 - earlier.0 as i128).clamp(i64::MIN as i128, i64::MAX as i128) as i64)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", format_seconds(self.as_secs_f64()))
    }
}

/// Signed span of virtual time in nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimDuration(i64);

impl SimDuration {
    pub const ZERO: SimDuration = SimDuration(0);

    pub const fn from_nanos(nanos: i64) -> Self {
        SimDuration(nanos)
    }

    pub const fn from_micros(micros: i64) -> Self {
        SimDuration(micros * 1_000)
    }

    pub const fn from_millis(millis: i64) -> Self {
        SimDuration(millis * 1_000_000)
    }

    pub const fn from_secs(secs: i64) -> Self {
        SimDuration(secs * 1_000_000_000)
    }

    /// Rounds to the nearest nanosecond. NaN maps to zero, infinities saturate.
    pub fn from_secs_f64(secs: f64) -> Self {
        if secs.is_nan() {
            return SimDuration::ZERO;
        }
        let nanos = (secs * NANOS_PER_SECOND).round();
        SimDuration(nanos.clamp(i64::MIN as f64, i64::MAX as f64) as i64)
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / NANOS_PER_SECOND
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl Add for SimDuration {
    type Output = SimDuration;

    fn add(self, rhs: SimDuration) -> SimDuration {
        SimDuration(self.0.saturating_add(rhs.0))
    }
}

impl Sub for SimTime {
    type Output = SimDuration;

    fn sub(self, rhs: SimTime) -> SimDuration {
        self.duration_since(rhs)
    }
}

/// Render a value with 6 significant digits using `%g` rules: fixed notation
/// for decimal exponents in [-5, 6), scientific otherwise, trailing zeros removed.
///
/// ```text
/// 1.0        -> "1"
/// 34.978312  -> "34.9783"
/// 149.99872  -> "149.999"
/// 1.5e-7     -> "1.5e-07"
/// ```
pub fn format_seconds(value: f64) -> String {
    const PRECISION: i32 = 6;

    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0".to_string() } else { "0".to_string() };
    }

    // Round to the target precision first; rounding can bump the exponent (999999.5 -> 1e+06).
    let scientific = format!("{:.*e}", (PRECISION - 1) as usize, value);
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (scientific.as_str(), 0),
    };

    if (-5..PRECISION).contains(&exponent) {
        let decimals = (PRECISION - 1 - exponent).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, value))
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_fraction(mantissa), sign, exponent.abs())
    }
}

fn trim_fraction(text: &str) -> String {
    if !text.contains('.') {
        return text.to_string();
    }
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

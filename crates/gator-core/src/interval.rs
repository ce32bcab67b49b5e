//! Duration literals for the refresh interval.
//!
//! Accepts a sequence of `<decimal><unit>` pairs such as `"1h30m"`, `"500ms"` or
//! `"1.5h"`. Units are `ns`, `us` (`µs`), `ms`, `s`, `m` and `h`.

use std::time::Duration;

use thiserror::Error;

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SEC: u128 = 1_000_000_000;

// Fraction digits beyond nanosecond resolution of an hour carry no information
const MAX_FRACTION_DIGITS: usize = 18;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntervalError {
    #[error("empty duration")]
    Empty,

    #[error("negative duration {0:?}")]
    Negative(String),

    #[error("invalid number in duration {0:?}")]
    InvalidNumber(String),

    #[error("missing unit in duration {0:?}")]
    MissingUnit(String),

    #[error("unknown unit {unit:?} in duration {literal:?}")]
    UnknownUnit { unit: String, literal: String },

    #[error("duration {0:?} is out of range")]
    Overflow(String),

    #[error("duration {0:?} must be greater than zero")]
    Zero(String),
}

fn unit_scale(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" | "μs" => Some(NANOS_PER_MICRO),
        "ms" => Some(NANOS_PER_MILLI),
        "s" => Some(NANOS_PER_SEC),
        "m" => Some(60 * NANOS_PER_SEC),
        "h" => Some(3600 * NANOS_PER_SEC),
        _ => None,
    }
}

fn split_digits(s: &str) -> (&str, &str) {
    let len = s.bytes().take_while(u8::is_ascii_digit).count();
    s.split_at(len)
}

/// Parse a duration literal into a strictly positive [`Duration`]
pub fn parse_interval(literal: &str) -> Result<Duration, IntervalError> {
    let overflow = || IntervalError::Overflow(literal.to_string());

    let mut rest = literal;
    if let Some(unsigned) = rest.strip_prefix('+') {
        rest = unsigned;
    } else if rest.starts_with('-') {
        return Err(IntervalError::Negative(literal.to_string()));
    }

    if rest.is_empty() {
        return Err(IntervalError::Empty);
    }
    if rest == "0" {
        return Err(IntervalError::Zero(literal.to_string()));
    }

    let mut total_nanos: u128 = 0;

    while !rest.is_empty() {
        let (whole, after) = split_digits(rest);
        let (fraction, after) = match after.strip_prefix('.') {
            Some(tail) => split_digits(tail),
            None => ("", after),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(IntervalError::InvalidNumber(literal.to_string()));
        }

        let unit_len = after
            .find(|c: char| c == '.' || c.is_ascii_digit())
            .unwrap_or(after.len());
        let (unit, after) = after.split_at(unit_len);
        if unit.is_empty() {
            return Err(IntervalError::MissingUnit(literal.to_string()));
        }
        let scale = unit_scale(unit).ok_or_else(|| IntervalError::UnknownUnit {
            unit: unit.to_string(),
            literal: literal.to_string(),
        })?;

        let whole_value: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| overflow())?
        };
        let mut nanos = whole_value.checked_mul(scale).ok_or_else(overflow)?;

        if !fraction.is_empty() {
            let digits = &fraction[..fraction.len().min(MAX_FRACTION_DIGITS)];
            let numerator: u128 = digits
                .parse()
                .map_err(|_| IntervalError::InvalidNumber(literal.to_string()))?;
            let denominator = 10u128.pow(digits.len() as u32);
            nanos = nanos
                .checked_add(numerator * scale / denominator)
                .ok_or_else(overflow)?;
        }

        total_nanos = total_nanos.checked_add(nanos).ok_or_else(overflow)?;
        if total_nanos > u128::from(u64::MAX) {
            return Err(overflow());
        }

        rest = after;
    }

    if total_nanos == 0 {
        return Err(IntervalError::Zero(literal.to_string()));
    }

    Ok(Duration::from_nanos(total_nanos as u64))
}

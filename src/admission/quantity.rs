//! Kubernetes resource quantity arithmetic
//!
//! Quantities are parsed into nano-units held in an `i128`, which covers
//! every suffix up to `Ei` without overflow. CPU is then rounded up to
//! millicores and memory up to whole bytes.

use thiserror::Error;

const NANOS: i128 = 1_000_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,

    #[error("invalid number in quantity '{0}'")]
    InvalidNumber(String),

    #[error("unknown suffix in quantity '{0}'")]
    UnknownSuffix(String),

    #[error("quantity '{0}' is out of range")]
    OutOfRange(String),
}

/// Multiplier of a suffix, as (numerator, denominator)
fn suffix_scale(suffix: &str) -> Option<(i128, i128)> {
    let scale = match suffix {
        "n" => (1, 1_000_000_000),
        "u" => (1, 1_000_000),
        "m" => (1, 1_000),
        "" => (1, 1),
        "k" => (1_000, 1),
        "M" => (1_000_000, 1),
        "G" => (1_000_000_000, 1),
        "T" => (1_000_000_000_000, 1),
        "P" => (1_000_000_000_000_000, 1),
        "E" => (1_000_000_000_000_000_000, 1),
        "Ki" => (1 << 10, 1),
        "Mi" => (1 << 20, 1),
        "Gi" => (1 << 30, 1),
        "Ti" => (1 << 40, 1),
        "Pi" => (1 << 50, 1),
        "Ei" => (1 << 60, 1),
        _ => return None,
    };
    Some(scale)
}

/// Split "1.5Gi" into ("1.5", "Gi"), also accepting "1e3" / "2E-2"
fn split_number(input: &str) -> (&str, &str) {
    let end = input
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.' || *c == '+' || *c == '-'))
        .map(|(i, _)| i)
        .unwrap_or(input.len());
    input.split_at(end)
}

fn parse_exponent(suffix: &str) -> Option<i32> {
    let rest = suffix.strip_prefix(['e', 'E'])?;
    if rest.is_empty() {
        return None;
    }
    rest.parse().ok()
}

/// Parse a quantity into nano-units
pub fn parse_nanos(input: &str) -> Result<i128, QuantityError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(QuantityError::Empty);
    }
    let invalid = || QuantityError::InvalidNumber(trimmed.to_string());
    let overflow = || QuantityError::OutOfRange(trimmed.to_string());

    let (number, suffix) = split_number(trimmed);
    let (negative, digits) = match number.as_bytes().first() {
        Some(b'-') => (true, &number[1..]),
        Some(b'+') => (false, &number[1..]),
        _ => (false, number),
    };
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    // Mantissa as an integer with `fraction.len()` implied decimals
    let mut mantissa: i128 = 0;
    for b in whole.bytes().chain(fraction.bytes()) {
        mantissa = mantissa
            .checked_mul(10)
            .and_then(|m| m.checked_add(i128::from(b - b'0')))
            .ok_or_else(overflow)?;
    }
    let mut decimals = i32::try_from(fraction.len()).map_err(|_| overflow())?;

    let (mut num, den) = match suffix_scale(suffix) {
        Some(scale) => scale,
        None => {
            let exponent = parse_exponent(suffix)
                .ok_or_else(|| QuantityError::UnknownSuffix(trimmed.to_string()))?;
            decimals -= exponent;
            (1, 1)
        }
    };

    num = num.checked_mul(NANOS).ok_or_else(overflow)?;
    let mut value = mantissa.checked_mul(num).ok_or_else(overflow)?;
    let mut divisor = den;
    if decimals >= 0 {
        divisor = divisor
            .checked_mul(10i128.checked_pow(decimals.unsigned_abs()).ok_or_else(overflow)?)
            .ok_or_else(overflow)?;
    } else {
        let factor = 10i128.checked_pow(decimals.unsigned_abs()).ok_or_else(overflow)?;
        value = value.checked_mul(factor).ok_or_else(overflow)?;
    }

    // Sub-nano precision rounds up
    let nanos = div_ceil(value, divisor);
    Ok(if negative { -nanos } else { nanos })
}

fn div_ceil(value: i128, divisor: i128) -> i128 {
    let quotient = value / divisor;
    if value % divisor != 0 { quotient + 1 } else { quotient }
}

/// Whole millicores of a CPU quantity, rounded up
pub fn cpu_millis(input: &str) -> Result<i128, QuantityError> {
    let nanos = parse_nanos(input)?;
    Ok(ceil_div_signed(nanos, 1_000_000))
}

/// Whole bytes of a memory quantity, rounded up
pub fn memory_bytes(input: &str) -> Result<i128, QuantityError> {
    let nanos = parse_nanos(input)?;
    Ok(ceil_div_signed(nanos, NANOS))
}

fn ceil_div_signed(value: i128, divisor: i128) -> i128 {
    if value >= 0 {
        div_ceil(value, divisor)
    } else {
        value / divisor
    }
}

/// Fixed-point denominator of a ratio; ratios carry at most 4 decimals
const RATIO_DENOMINATOR: i128 = 10_000;

/// `floor(value * ratio)`, clamped at zero
///
/// The ratio is applied at its 4-decimal fixed-point value.
pub fn scale(value: i128, ratio: f64) -> i128 {
    let numerator = (ratio * RATIO_DENOMINATOR as f64).round();
    if value <= 0 || numerator <= 0.0 {
        return 0;
    }
    let numerator = numerator as i128;
    match value.checked_mul(numerator) {
        Some(product) => product / RATIO_DENOMINATOR,
        None => value / RATIO_DENOMINATOR * numerator,
    }
}

/// Render millicores the way the API server prints them
pub fn format_cpu_millis(millis: i128) -> String {
    format!("{millis}m")
}

/// Render a byte count as a plain integer quantity
pub fn format_memory_bytes(bytes: i128) -> String {
    bytes.to_string()
}

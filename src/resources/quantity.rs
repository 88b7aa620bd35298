//! Storage quantity arithmetic
//!
//! Claims are compared and submitted in whole GiB so that reconciling an
//! already aligned value never produces a changed request.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::controller::error::{Error, Result};

/// Platform allocation granularity for volume capacity
pub const ALLOCATION_UNIT: u64 = 1 << 30;

const BINARY_SUFFIXES: [(&str, u32); 6] = [
    ("Ki", 1),
    ("Mi", 2),
    ("Gi", 3),
    ("Ti", 4),
    ("Pi", 5),
    ("Ei", 6),
];

const DECIMAL_SUFFIXES: [(&str, u32); 7] = [
    ("k", 1),
    ("K", 1),
    ("M", 2),
    ("G", 3),
    ("T", 4),
    ("P", 5),
    ("E", 6),
];

fn multiplier(suffix: &str) -> Option<u128> {
    if suffix.is_empty() {
        return Some(1);
    }
    if let Some((_, exp)) = BINARY_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
        return Some(1024u128.pow(*exp));
    }
    DECIMAL_SUFFIXES
        .iter()
        .find(|(s, _)| *s == suffix)
        .map(|(_, exp)| 1000u128.pow(*exp))
}

/// Parse a quantity such as `10Gi`, `100G`, `1.5Ti` or `10500000000` into bytes.
///
/// Fractional bytes are rounded up.
pub fn parse_bytes(value: &str) -> Result<u64> {
    let value = value.trim();
    let invalid = || Error::QuantityError(value.to_string());

    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let (number, suffix) = value.split_at(split);
    if number.is_empty() {
        return Err(invalid());
    }

    let mult = multiplier(suffix).ok_or_else(invalid)?;

    let (whole, frac) = match number.split_once('.') {
        Some((w, f)) => (w, f),
        None => (number, ""),
    };
    if frac.contains('.') || (whole.is_empty() && frac.is_empty()) || frac.len() > 18 {
        return Err(invalid());
    }

    let digits: u128 = format!("{}{}", whole, frac)
        .parse()
        .map_err(|_| invalid())?;
    let scale = 10u128.pow(frac.len() as u32);

    let scaled = digits.checked_mul(mult).ok_or_else(invalid)?;
    let bytes = scaled.div_ceil(scale);
    u64::try_from(bytes).map_err(|_| invalid())
}

/// Parse a k8s-openapi quantity
pub fn quantity_bytes(quantity: &Quantity) -> Result<u64> {
    parse_bytes(&quantity.0)
}

/// Round a byte count up to the next whole allocation unit
pub fn round_up(bytes: u64) -> u64 {
    bytes.div_ceil(ALLOCATION_UNIT) * ALLOCATION_UNIT
}

/// Render an aligned byte count as a `Gi` quantity
pub fn to_quantity(bytes: u64) -> Quantity {
    Quantity(format!("{}Gi", round_up(bytes) / ALLOCATION_UNIT))
}

/// Parse and align a quantity string
pub fn aligned_bytes(value: &str) -> Result<u64> {
    parse_bytes(value).map(round_up)
}

//! Numeric normalization of extracted field values.
//!
//! Values arrive decorated with currency signs, thousands separators and
//! emoji. Everything except ASCII digits, `.` and `-` is stripped before
//! parsing; anything that still fails to parse becomes `None`.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sigrelay_core::try_price_scale;
use std::str::FromStr;

/// Parse a price-like value at `PRICE_SCALE` precision.
///
/// Values too large for the price columns are `None`.
pub fn to_decimal(value: &str) -> Option<Decimal> {
    let cleaned: String = value
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();

    if !cleaned.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }

    Decimal::from_str(&cleaned).ok().and_then(try_price_scale)
}

/// Parse a leverage value such as `"20x"` into an integer.
///
/// Fractional leverage truncates toward zero.
pub fn to_leverage(value: &str) -> Option<i32> {
    let trimmed = value.trim().trim_end_matches(['x', 'X']);
    to_decimal(trimmed)?.trunc().to_i32()
}

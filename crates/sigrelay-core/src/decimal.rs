//! Fixed-scale decimal handling for signal prices.
//!
//! Every price field (entry, targets, stop loss) is stored with exactly
//! `PRICE_SCALE` fractional digits so the in-memory value, the database
//! column and the broadcast payload all agree.

use rust_decimal::Decimal;

/// Number of fractional digits carried by price fields.
pub const PRICE_SCALE: u32 = 8;

/// Integer digits that fit a `NUMERIC(30,8)` column.
pub const PRICE_INTEGER_DIGITS: u32 = 22;

/// Round to `PRICE_SCALE` digits (banker's rounding) and pad to that scale.
#[inline]
pub fn to_price_scale(value: Decimal) -> Decimal {
    let mut scaled = value.round_dp(PRICE_SCALE);
    scaled.rescale(PRICE_SCALE);
    scaled
}

/// [`to_price_scale`], or `None` when the value cannot be carried at
/// `PRICE_SCALE` or exceeds the stored column range.
///
/// `rescale` silently lowers the scale when the mantissa would overflow.
pub fn try_price_scale(value: Decimal) -> Option<Decimal> {
    let scaled = to_price_scale(value);
    if scaled.scale() != PRICE_SCALE {
        return None;
    }
    let limit = Decimal::from_i128_with_scale(10i128.pow(PRICE_INTEGER_DIGITS), 0);
    (scaled.abs() < limit).then_some(scaled)
}

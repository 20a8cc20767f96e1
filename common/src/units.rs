//! Conversions between human decimal amounts and on-chain raw base units.
//!
//! All monetary math runs on [`BigDecimal`]: raw-unit conversions are pure
//! base-10 exponent shifts, never floating point.

use bigdecimal::{
    num_bigint::{BigInt, Sign},
    BigDecimal, RoundingMode,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UnitsError {
    #[error("amount {0} is not representable in {1} decimals")]
    NotRepresentable(BigDecimal, u8),
    #[error("negative amount not allowed: {0}")]
    Negative(BigDecimal),
    #[error("invalid decimal amount: {0}")]
    InvalidDecimal(String),
}

/// 10^decimals as an exact decimal factor.
fn shift_factor(decimals: u8) -> BigDecimal {
    // A negative scale multiplies the digits by 10^decimals.
    BigDecimal::new(BigInt::from(1), -(decimals as i64))
}

/// Convert a decimal amount to raw base units, failing when the amount has
/// more fractional digits than the token supports.
pub fn to_raw_units(amount: &BigDecimal, decimals: u8) -> Result<BigInt, UnitsError> {
    let shifted = amount * shift_factor(decimals);
    if !shifted.is_integer() {
        return Err(UnitsError::NotRepresentable(amount.clone(), decimals));
    }
    let (digits, _) = shifted.with_scale(0).into_bigint_and_exponent();
    Ok(digits)
}

/// Like [`to_raw_units`] but truncating sub-unit dust toward zero.
/// Dust below the asset's precision never rounds up.
pub fn to_raw_units_floor(amount: &BigDecimal, decimals: u8) -> Result<BigInt, UnitsError> {
    let shifted = amount * shift_factor(decimals);
    let (digits, _) = shifted
        .with_scale_round(0, RoundingMode::Down)
        .into_bigint_and_exponent();
    Ok(digits)
}

/// Convert raw base units back to a decimal amount.
pub fn from_raw_units(raw: &BigInt, decimals: u8) -> BigDecimal {
    BigDecimal::new(raw.clone(), decimals as i64)
}

/// Parse a decimal string into a BigDecimal.
pub fn parse_decimal(raw: &str) -> Result<BigDecimal, UnitsError> {
    raw.parse::<BigDecimal>()
        .map_err(|_| UnitsError::InvalidDecimal(raw.to_string()))
}

pub fn is_negative(amount: &BigDecimal) -> bool {
    amount.sign() == Sign::Minus
}

pub fn is_positive(amount: &BigDecimal) -> bool {
    amount.sign() == Sign::Plus
}

pub fn zero() -> BigDecimal {
    BigDecimal::from(0u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_conversion_shifts_by_decimals() {
        let amount = parse_decimal("1.5").unwrap();
        let raw = to_raw_units(&amount, 6).unwrap();
        assert_eq!(raw, BigInt::from(1_500_000u64));
        assert_eq!(from_raw_units(&raw, 6), amount);
    }

    #[test]
    fn sub_unit_amounts_are_rejected() {
        let amount = parse_decimal("0.0000001").unwrap();
        assert!(to_raw_units(&amount, 6).is_err());
    }

    #[test]
    fn negative_amounts_convert_with_sign() {
        let amount = parse_decimal("-2").unwrap();
        let raw = to_raw_units(&amount, 2).unwrap();
        assert_eq!(raw, BigInt::from(-200));
        assert!(is_negative(&amount));
    }

    #[test]
    fn zero_decimals_is_identity() {
        let amount = parse_decimal("42").unwrap();
        assert_eq!(to_raw_units(&amount, 0).unwrap(), BigInt::from(42));
    }

    #[test]
    fn floor_truncates_dust_toward_zero() {
        // Balances carrying dust below the asset precision must never
        // round up to a raw unit they do not fully back.
        let amount = parse_decimal("1.4999999").unwrap();
        assert_eq!(
            to_raw_units_floor(&amount, 3).unwrap(),
            BigInt::from(1499)
        );
        let amount = parse_decimal("0.9999999").unwrap();
        assert_eq!(to_raw_units_floor(&amount, 3).unwrap(), BigInt::from(999));
        // Negative amounts truncate toward zero as well.
        let amount = parse_decimal("-0.9999999").unwrap();
        assert_eq!(to_raw_units_floor(&amount, 3).unwrap(), BigInt::from(-999));
        // Exact amounts pass through unchanged.
        let amount = parse_decimal("1.5").unwrap();
        assert_eq!(to_raw_units_floor(&amount, 3).unwrap(), BigInt::from(1500));
    }
}

//! Scale-4 fixed-point money.
//!
//! Every amount that crosses the API boundary is quantized to four
//! fractional digits with banker's (midpoint-nearest-even) rounding and
//! rendered as a fixed-4dp string. Balanced-sum checks run on the exact
//! `Decimal` representation, never on floats — tool schemas accept money
//! only as strings, so a JSON float can never reach this module.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::constants::MONEY_SCALE;
use crate::error::KeelError;

/// Quantize to scale 4 with banker's rounding.
pub fn quantize(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointNearestEven)
}

/// Parse a decimal string into a quantized amount.
pub fn parse_amount(raw: &str) -> Result<Decimal, KeelError> {
    let trimmed = raw.trim();
    let value: Decimal = trimmed
        .parse()
        .map_err(|_| KeelError::InvalidAmount(trimmed.to_string()))?;
    Ok(quantize(value))
}

/// Canonical fixed-4dp rendering, e.g. `-10.0000`.
pub fn format_amount(value: Decimal) -> String {
    format!("{:.4}", quantize(value))
}

/// Exact balanced-sum check at scale 4.
pub fn ensure_balanced(amounts: &[Decimal]) -> Result<(), KeelError> {
    let total: Decimal = amounts.iter().map(|a| quantize(*a)).sum();
    if total != Decimal::ZERO {
        return Err(KeelError::UnbalancedBundle);
    }
    Ok(())
}

/// Impact amount of a balanced bundle: Σ|posting| / 2, quantized.
///
/// Balanced bundles have equal positive and negative legs, so this is the
/// one-sided magnitude of the movement.
pub fn impact_amount(amounts: &[Decimal]) -> Decimal {
    let absolute_total: Decimal = amounts.iter().map(|a| quantize(*a).abs()).sum();
    quantize(absolute_total / Decimal::TWO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_quantizes_to_scale_4() {
        assert_eq!(format_amount(parse_amount("10").unwrap()), "10.0000");
        assert_eq!(format_amount(parse_amount("10.12345").unwrap()), "10.1234");
        assert_eq!(format_amount(parse_amount("-0.5").unwrap()), "-0.5000");
    }

    #[test]
    fn bankers_rounding_half_to_even() {
        // .00005 rounds to the even neighbour at scale 4.
        assert_eq!(format_amount(parse_amount("0.00005").unwrap()), "0.0000");
        assert_eq!(format_amount(parse_amount("0.00015").unwrap()), "0.0002");
        assert_eq!(format_amount(parse_amount("0.00025").unwrap()), "0.0002");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_amount("ten dollars").is_err());
        assert!(parse_amount("").is_err());
        assert!(parse_amount("10.0.0").is_err());
    }

    #[test]
    fn balanced_sum_is_exact() {
        let a = parse_amount("10.0000").unwrap();
        let b = parse_amount("-10.0000").unwrap();
        assert!(ensure_balanced(&[a, b]).is_ok());

        let off = parse_amount("-9.9999").unwrap();
        assert!(matches!(
            ensure_balanced(&[a, off]).unwrap_err(),
            KeelError::UnbalancedBundle
        ));
    }

    #[test]
    fn impact_is_half_absolute_total() {
        let amounts = vec![
            parse_amount("250.0000").unwrap(),
            parse_amount("-250.0000").unwrap(),
        ];
        assert_eq!(format_amount(impact_amount(&amounts)), "250.0000");

        let split = vec![
            parse_amount("100.0000").unwrap(),
            parse_amount("50.0000").unwrap(),
            parse_amount("-150.0000").unwrap(),
        ];
        assert_eq!(format_amount(impact_amount(&split)), "150.0000");
    }
}

//! Unit and address formatting helpers

use alloy::primitives::{Address, U256};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Significant digits a `Decimal` can hold
const DECIMAL_DIGITS: usize = 28;

/// Convert a raw integer amount into human units with `decimals` fraction digits.
///
/// Fraction digits beyond what `Decimal` can represent are truncated. Returns
/// `None` for non-numeric input or an integer part that does not fit.
pub fn format_units(raw: &str, decimals: u32) -> Option<Decimal> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let digits = raw.trim_start_matches('0');
    let decimals = decimals as usize;

    let (int_part, frac_part) = if digits.len() > decimals {
        let (i, f) = digits.split_at(digits.len() - decimals);
        (i.to_string(), f.to_string())
    } else {
        ("0".to_string(), format!("{:0>width$}", digits, width = decimals))
    };

    if int_part.len() > DECIMAL_DIGITS {
        return None;
    }

    let budget = DECIMAL_DIGITS - int_part.len();
    let frac = frac_part[..frac_part.len().min(budget)].trim_end_matches('0');

    let text = if frac.is_empty() {
        int_part
    } else {
        format!("{}.{}", int_part, frac)
    };

    Decimal::from_str(&text).ok()
}

pub fn format_u256(raw: U256, decimals: u32) -> Option<Decimal> {
    format_units(&raw.to_string(), decimals)
}

/// Lossy float view of a raw integer, for pricing math only
pub fn u256_to_f64(raw: U256) -> f64 {
    raw.to_string().parse().unwrap_or(0.0)
}

/// EIP-55 checksummed form, the canonical address representation in the store
pub fn checksum(address: &Address) -> String {
    address.to_checksum(None)
}

/// Parse a 0x address in any case and return its checksummed form
pub fn normalize_address(raw: &str) -> Option<String> {
    Address::from_str(raw.trim()).ok().map(|a| checksum(&a))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_format_units_six_decimals() {
        assert_eq!(format_units("500000000", 6), Some(dec!(500)));
        assert_eq!(format_units("1500000", 6), Some(dec!(1.5)));
        assert_eq!(format_units("1", 6), Some(dec!(0.000001)));
        assert_eq!(format_units("0", 6), Some(dec!(0)));
    }

    #[test]
    fn test_format_units_eighteen_decimals() {
        assert_eq!(format_units("1000000000000000000", 18), Some(dec!(1)));
        assert_eq!(format_units("123456789000000000000", 18), Some(dec!(123.456789)));
    }

    #[test]
    fn test_format_units_rejects_garbage() {
        assert_eq!(format_units("", 6), None);
        assert_eq!(format_units("-5", 6), None);
        assert_eq!(format_units("0x10", 6), None);
    }

    #[test]
    fn test_format_units_truncates_excess_precision() {
        // 30 digits with 18 decimals: 12 integer digits, fraction truncated to 16
        let value = format_units("123456789012345678901234567891", 18).unwrap();
        assert_eq!(value.trunc(), dec!(123456789012));
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(
            normalize_address("0x2cc4bcfbff295131ae0f3aa5c2c822a68d6489dd").as_deref(),
            Some("0x2Cc4BcfBFF295131ae0f3aA5c2C822a68d6489dd")
        );
        assert_eq!(normalize_address("nope"), None);
    }
}

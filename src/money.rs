//! Money Parsing Module
//!
//! Conversion between user-typed amount strings and the fixed-point
//! [`Decimal`] representation used by the ledger. All user input MUST go
//! through [`parse_amount`]; nothing in the crate parses amounts with floats.
//!
//! ## Rules
//! 1. Amounts are strictly positive
//! 2. At most [`AMOUNT_SCALE`] fractional digits, no silent truncation
//! 3. `,` is accepted as decimal separator (chat users type both)
//! 4. `.5` and `5.` are rejected as ambiguous
//! 5. At most [`MAX_WHOLE_DIGITS`] integer digits, so every amount and every
//!    sum of two amounts fits a `NUMERIC(36,8)` column

use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

use crate::core_types::AMOUNT_SCALE;

/// Integer digits of a `NUMERIC(36,8)` column
pub const MAX_WHOLE_DIGITS: u32 = 36 - AMOUNT_SCALE;

/// Money parsing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: usize, max: u32 },

    #[error("Amount must be positive")]
    NotPositive,

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Parse a user-typed amount into a positive [`Decimal`]
///
/// # Errors
/// * `InvalidFormat` - empty, signed, exponent notation, stray characters
/// * `PrecisionOverflow` - more than [`AMOUNT_SCALE`] fractional digits
/// * `NotPositive` - zero
/// * `Overflow` - more than [`MAX_WHOLE_DIGITS`] integer digits
pub fn parse_amount(text: &str) -> Result<Decimal, MoneyError> {
    let text = text.trim().replace(',', ".");
    if text.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }

    if text.starts_with('-') {
        return Err(MoneyError::NotPositive);
    }

    let (whole, frac) = match text.split_once('.') {
        None => (text.as_str(), ""),
        Some((whole, frac)) => {
            if whole.is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing leading zero (e.g., use 0.5 instead of .5)".into(),
                ));
            }
            if frac.is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing fractional part (e.g., use 5.0 instead of 5.)".into(),
                ));
            }
            (whole, frac)
        }
    };

    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(MoneyError::InvalidFormat(format!(
            "not a plain decimal number: {}",
            text
        )));
    }

    if frac.len() > AMOUNT_SCALE as usize {
        return Err(MoneyError::PrecisionOverflow {
            provided: frac.len(),
            max: AMOUNT_SCALE,
        });
    }

    if whole.trim_start_matches('0').len() > MAX_WHOLE_DIGITS as usize {
        return Err(MoneyError::Overflow);
    }

    let amount = Decimal::from_str(&text)
        .map_err(|e| MoneyError::InvalidFormat(format!("invalid decimal: {}", e)))?;

    if amount <= Decimal::ZERO {
        return Err(MoneyError::NotPositive);
    }

    Ok(amount)
}

/// Whether `amount` fits a `NUMERIC(36,8)` column
pub fn fits_column(amount: Decimal) -> bool {
    amount.abs() < Decimal::from_i128_with_scale(10_i128.pow(MAX_WHOLE_DIGITS), 0)
}

/// `a + b`, failing instead of panicking when the sum leaves the column range
pub fn checked_sum(a: Decimal, b: Decimal) -> Result<Decimal, MoneyError> {
    a.checked_add(b)
        .filter(|sum| fits_column(*sum))
        .ok_or(MoneyError::Overflow)
}

/// Format an amount for display: trailing zeros stripped, no exponent
///
/// ```
/// use rust_decimal::Decimal;
/// use std::str::FromStr;
///
/// let d = Decimal::from_str("4.90000000").unwrap();
/// assert_eq!(chatpay::money::format_amount(d), "4.9");
/// ```
pub fn format_amount(amount: Decimal) -> String {
    amount.normalize().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_parse_plain_amounts() {
        assert_eq!(parse_amount("5").unwrap(), dec("5"));
        assert_eq!(parse_amount(" 0.1 ").unwrap(), dec("0.1"));
        assert_eq!(parse_amount("12,5").unwrap(), dec("12.5"));
        assert_eq!(parse_amount("0.00000001").unwrap(), dec("0.00000001"));
    }

    #[test]
    fn test_parse_rejects_non_positive() {
        assert_eq!(parse_amount("0"), Err(MoneyError::NotPositive));
        assert_eq!(parse_amount("0.0"), Err(MoneyError::NotPositive));
        assert_eq!(parse_amount("-1"), Err(MoneyError::NotPositive));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "abc", "1e5", "NaN", "inf", "1.2.3", ".5", "5.", "+5", "1 000"] {
            assert!(
                matches!(parse_amount(bad), Err(MoneyError::InvalidFormat(_))),
                "expected InvalidFormat for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_parse_precision_overflow() {
        assert_eq!(
            parse_amount("0.000000001"),
            Err(MoneyError::PrecisionOverflow {
                provided: 9,
                max: 8
            })
        );
    }

    #[test]
    fn test_parse_rejects_amounts_beyond_column() {
        assert_eq!(
            parse_amount("79228162514264337593543950335"),
            Err(MoneyError::Overflow)
        );
        assert_eq!(
            parse_amount("10000000000000000000000000000"),
            Err(MoneyError::Overflow)
        );

        let widest = "9".repeat(28);
        assert_eq!(parse_amount(&widest).unwrap(), dec(&widest));
        assert_eq!(parse_amount(&format!("000{}", widest)).unwrap(), dec(&widest));
    }

    #[test]
    fn test_checked_sum() {
        assert_eq!(checked_sum(dec("5"), dec("0.1")).unwrap(), dec("5.1"));

        let widest = dec(&"9".repeat(28));
        assert_eq!(checked_sum(widest, dec("1")), Err(MoneyError::Overflow));
        assert_eq!(checked_sum(Decimal::MAX, dec("1")), Err(MoneyError::Overflow));
        assert!(fits_column(widest));
        assert!(!fits_column(-widest - dec("1")));
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(dec("10.00000000")), "10");
        assert_eq!(format_amount(dec("4.90000000")), "4.9");
        assert_eq!(format_amount(dec("0.00000001")), "0.00000001");
    }
}

use bigdecimal::{BigDecimal, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("invalid amount '{0}'")]
    InvalidAmount(String),
    #[error("invalid currency code '{0}'")]
    InvalidCurrency(String),
}

/// Normalize a monetary value to 2 decimal places (extra precision is truncated, never rounded up).
pub fn normalize_scale(value: &BigDecimal) -> BigDecimal {
    value.with_scale(2)
}

/// Parse a plain non-negative decimal amount such as `12`, `12.3` or `12.34`.
///
/// Signs, exponents, thousands separators and surrounding garbage are rejected;
/// providers send amounts as bare decimal strings.
pub fn parse_amount(raw: &str) -> Result<BigDecimal, MoneyError> {
    let trimmed = raw.trim();
    let (whole, fraction) = match trimmed.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (trimmed, None),
    };
    let digits_only = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !digits_only(whole) || !fraction.map_or(true, digits_only) {
        return Err(MoneyError::InvalidAmount(raw.to_string()));
    }
    BigDecimal::from_str(trimmed).map_err(|_| MoneyError::InvalidAmount(raw.to_string()))
}

/// Render an amount with exactly two decimals, e.g. `10` -> `10.00`.
pub fn format_amount(value: &BigDecimal) -> String {
    normalize_scale(value).to_string()
}

/// Amount in cents after normalization; `None` when it does not fit an i64.
pub fn to_minor_units(value: &BigDecimal) -> Option<i64> {
    (normalize_scale(value) * BigDecimal::from(100)).to_i64()
}

/// Two amounts are the same charge when they agree to the cent. Both sides are
/// truncated to two decimals first, so fractions of a cent are dropped
/// (`10.009` matches `10.00`).
pub fn amounts_match(a: &BigDecimal, b: &BigDecimal) -> bool {
    normalize_scale(a) == normalize_scale(b)
}

/// ISO 4217 alphabetic code, stored uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for CurrencyCode {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.len() == 3 && trimmed.bytes().all(|b| b.is_ascii_alphabetic()) {
            Ok(Self(trimmed.to_ascii_uppercase()))
        } else {
            Err(MoneyError::InvalidCurrency(s.to_string()))
        }
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = MoneyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CurrencyCode> for String {
    fn from(value: CurrencyCode) -> Self {
        value.0
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

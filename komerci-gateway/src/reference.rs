//! Invoice references exchanged with Komerci: the configured prefix followed by the
//! decimal order id, e.g. `WC-482`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DecodeError;

/// Host-assigned order identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceReference(String);

impl InvoiceReference {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvoiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn encode(order_id: OrderId, prefix: &str) -> InvoiceReference {
    InvoiceReference(format!("{prefix}{}", order_id.0))
}

pub fn decode(reference: &str, prefix: &str) -> Result<OrderId, DecodeError> {
    let digits = reference
        .strip_prefix(prefix)
        .ok_or(DecodeError::PrefixMismatch)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DecodeError::NotNumeric);
    }
    digits
        .parse::<u64>()
        .map(OrderId)
        .map_err(|_| DecodeError::NotNumeric)
}

/// A prefix ending in a digit blurs the boundary with the id (`WC-1` + `23` vs `WC-` + `123`).
pub fn prefix_is_ambiguous(prefix: &str) -> bool {
    prefix.bytes().last().is_some_and(|b| b.is_ascii_digit())
}

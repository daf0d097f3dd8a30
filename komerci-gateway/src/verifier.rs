use bigdecimal::BigDecimal;
use common_money::parse_amount;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::config::GatewayConfig;
use crate::error::VerificationError;
use crate::reference::{decode, InvoiceReference, OrderId};

/// Form fields of an inbound notification, exactly as received.
pub type RawNotification = HashMap<String, String>;

pub const SIGNATURE_FIELD: &str = "signature";

/// A notification that passed every check and may drive an order transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub reference: InvoiceReference,
    pub order_id: OrderId,
    pub status: String,
    pub amount: BigDecimal,
}

/// Decides whether a notification really comes from the provider.
pub trait Authenticator: Send + Sync {
    fn verify(&self, fields: &RawNotification, signature: &str) -> bool;
}

/// HMAC-SHA256 over the canonical form of every field except the signature:
/// fields sorted by name, name and value percent-encoded, joined as `name=value`
/// with `&`, hex encoded. Encoding keeps `&` and `=` inside a value from forging
/// field boundaries.
#[derive(Clone)]
pub struct HmacSha256Authenticator {
    secret: Vec<u8>,
}

impl HmacSha256Authenticator {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self { secret: secret.into() }
    }

    pub fn canonical(fields: &RawNotification) -> String {
        let mut pairs: Vec<(&String, &String)> = fields
            .iter()
            .filter(|(name, _)| name.as_str() != SIGNATURE_FIELD)
            .collect();
        pairs.sort();
        pairs
            .into_iter()
            .map(|(name, value)| format!("{}={}", urlencoding::encode(name), urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&")
    }

    pub fn sign(&self, fields: &RawNotification) -> Option<String> {
        if self.secret.is_empty() {
            return None;
        }
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.secret).ok()?;
        mac.update(Self::canonical(fields).as_bytes());
        Some(hex::encode(mac.finalize().into_bytes()))
    }
}

impl Authenticator for HmacSha256Authenticator {
    fn verify(&self, fields: &RawNotification, signature: &str) -> bool {
        let Some(expected) = self.sign(fields) else {
            return false;
        };
        let provided = signature.trim();
        let provided = provided.strip_prefix("sha256=").unwrap_or(provided).to_ascii_lowercase();
        expected.as_bytes().ct_eq(provided.as_bytes()).into()
    }
}

#[derive(Clone)]
pub struct NotificationVerifier {
    authenticator: Arc<dyn Authenticator>,
}

impl NotificationVerifier {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self { authenticator }
    }

    pub fn verify(&self, raw: &RawNotification, config: &GatewayConfig) -> Result<Notification, VerificationError> {
        let reference = required(raw, "reference")?;
        let status = required(raw, "status")?;
        let amount = parse_amount(required(raw, "amount")?)
            .map_err(|_| VerificationError::Malformed("amount"))?;
        let signature = required(raw, SIGNATURE_FIELD)?;

        if !self.authenticator.verify(raw, signature) {
            return Err(VerificationError::BadSignature);
        }

        let order_id = decode(reference, &config.invoice_prefix).map_err(VerificationError::BadReference)?;
        Ok(Notification {
            reference: InvoiceReference::new(reference),
            order_id,
            status: status.to_string(),
            amount,
        })
    }
}

fn required<'a>(raw: &'a RawNotification, field: &'static str) -> Result<&'a str, VerificationError> {
    raw.get(field)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or(VerificationError::Malformed(field))
}

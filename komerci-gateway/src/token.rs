//! Payment token exchange with Komerci: the order goes out as a payment request,
//! an opaque token comes back and becomes the buyer's redirect URL.

use common_money::{format_amount, to_minor_units, CurrencyCode};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use crate::config::{GatewayConfig, ProviderConfig};
use crate::error::{ConfigError, GatewayError, ProviderError};
use crate::observe::{DebugLog, GatewayMetrics};
use crate::reference::{encode, InvoiceReference};
use crate::store::Order;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentPayload {
    pub reference: InvoiceReference,
    pub amount: String,
    pub amount_minor: i64,
    pub currency: CurrencyCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_url: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

/// Rewrites the outgoing payload. Filters run in registration order and are fixed
/// once the requester is built.
pub type PayloadFilter = Arc<dyn Fn(PaymentPayload, &Order) -> PaymentPayload + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentToken {
    pub token: String,
    pub redirect_url: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    error: Option<String>,
    message: Option<String>,
}

impl TokenResponse {
    fn reason(&self) -> Option<String> {
        self.message.clone().or_else(|| self.error.clone())
    }
}

#[derive(Clone)]
pub struct TokenRequester {
    client: Client,
    token_url: String,
    payment_url: String,
    notification_url: Option<String>,
    filters: Vec<PayloadFilter>,
    metrics: Option<GatewayMetrics>,
}

impl TokenRequester {
    pub fn new(config: &ProviderConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| ConfigError::Invalid(format!("http client: {err}")))?;
        Ok(Self {
            client,
            token_url: config.token_url.clone(),
            payment_url: config.payment_url.clone(),
            notification_url: config.notification_url.clone(),
            filters: Vec::new(),
            metrics: None,
        })
    }

    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(PaymentPayload, &Order) -> PaymentPayload + Send + Sync + 'static,
    {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn with_metrics(mut self, metrics: GatewayMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build_payload(&self, order: &Order, invoice_prefix: &str) -> Result<PaymentPayload, ConfigError> {
        let amount_minor = to_minor_units(&order.total)
            .ok_or_else(|| ConfigError::Invalid(format!("order {} total is out of range", order.id)))?;
        let payload = PaymentPayload {
            reference: encode(order.id, invoice_prefix),
            amount: format_amount(&order.total),
            amount_minor,
            currency: order.currency.clone(),
            notification_url: self.notification_url.clone(),
            extra: BTreeMap::new(),
        };
        Ok(self
            .filters
            .iter()
            .fold(payload, |payload, filter| filter(payload, order)))
    }

    pub fn redirect_url(&self, token: &str) -> String {
        format!("{}{}", self.payment_url, urlencoding::encode(token))
    }

    pub async fn request_token(
        &self,
        order: &Order,
        config: &GatewayConfig,
        log: &DebugLog,
    ) -> Result<PaymentToken, GatewayError> {
        if !config.accepts_currency(&order.currency) {
            log.add(format_args!("Refusing order {}: currency {} not accepted", order.id, order.currency));
            return Err(ConfigError::UnsupportedCurrency(order.currency.clone()).into());
        }
        let payload = self.build_payload(order, &config.invoice_prefix)?;
        log.add(format_args!("Requesting payment token for {}", payload.reference));

        let started = Instant::now();
        let result = self.exchange(&payload).await;
        if let Some(metrics) = &self.metrics {
            metrics.token_request_seconds.observe(started.elapsed().as_secs_f64());
            metrics.record_token_request(match &result {
                Ok(_) => "ok",
                Err(ProviderError::Network(_)) => "network",
                Err(ProviderError::Rejected(_)) => "rejected",
                Err(ProviderError::MalformedResponse(_)) => "malformed",
            });
        }

        match result {
            Ok(token) => {
                log.add(format_args!("Payment token issued for {}", payload.reference));
                Ok(PaymentToken { redirect_url: self.redirect_url(&token), token })
            }
            Err(err) => {
                if matches!(err, ProviderError::MalformedResponse(_)) {
                    warn!(reference = %payload.reference, error = %err, "Malformed token response from provider");
                }
                log.add(format_args!("Token request for {} failed: {err}", payload.reference));
                Err(err.into())
            }
        }
    }

    async fn exchange(&self, payload: &PaymentPayload) -> Result<String, ProviderError> {
        let resp = self
            .client
            .post(&self.token_url)
            .json(payload)
            .send()
            .await
            .map_err(|err| ProviderError::Network(err.to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|err| ProviderError::Network(err.to_string()))?;

        if status.is_server_error() {
            return Err(ProviderError::Network(format!("provider returned {status}")));
        }
        let parsed = serde_json::from_str::<TokenResponse>(&body);
        if status.is_client_error() {
            let reason = parsed
                .ok()
                .and_then(|r| r.reason())
                .unwrap_or_else(|| format!("provider returned {status}"));
            return Err(ProviderError::Rejected(reason));
        }
        if !status.is_success() {
            return Err(ProviderError::MalformedResponse(format!("unexpected status {status}")));
        }

        let parsed = parsed.map_err(|err| ProviderError::MalformedResponse(err.to_string()))?;
        match parsed.token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Ok(token.to_string()),
            _ => match parsed.reason() {
                Some(reason) => Err(ProviderError::Rejected(reason)),
                None => Err(ProviderError::MalformedResponse("response carries no token".to_string())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::OrderId;
    use crate::store::OrderStatus;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;
    use std::time::Duration;

    fn requester() -> TokenRequester {
        TokenRequester::new(&ProviderConfig {
            token_url: "http://127.0.0.1:9/token".into(),
            payment_url: "https://pay.example/checkout?token=".into(),
            notification_url: Some("https://shop.example/wc-api/komerci".into()),
            shared_secret: "s3cr3t".into(),
            timeout: Duration::from_secs(1),
        })
        .unwrap()
    }

    fn order() -> Order {
        Order {
            id: OrderId(482),
            currency: "BRL".parse().unwrap(),
            total: BigDecimal::from_str("149.9").unwrap(),
            status: OrderStatus::Pending,
        }
    }

    #[test]
    fn payload_carries_reference_and_amounts() {
        let payload = requester().build_payload(&order(), "WC-").unwrap();
        assert_eq!(payload.reference.as_str(), "WC-482");
        assert_eq!(payload.amount, "149.90");
        assert_eq!(payload.amount_minor, 14990);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["currency"], "BRL");
        assert_eq!(json["notification_url"], "https://shop.example/wc-api/komerci");
    }

    #[test]
    fn filters_apply_in_order() {
        let requester = requester()
            .with_filter(|mut p, _| {
                p.extra.insert("installments".into(), "1".into());
                p
            })
            .with_filter(|mut p, order| {
                let next = if p.extra.contains_key("installments") { "3" } else { "0" };
                p.extra.insert("installments".into(), next.into());
                p.extra.insert("order".into(), order.id.to_string());
                p
            });
        let payload = requester.build_payload(&order(), "WC-").unwrap();
        assert_eq!(payload.extra.get("installments").map(String::as_str), Some("3"));
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["order"], "482");
    }

    #[test]
    fn redirect_url_escapes_token() {
        assert_eq!(
            requester().redirect_url("a b/c"),
            "https://pay.example/checkout?token=a%20b%2Fc"
        );
    }
}

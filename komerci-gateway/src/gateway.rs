use axum::http::StatusCode;
use common_http_errors::ApiError;
use common_money::CurrencyCode;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{GatewayConfig, Settings, GATEWAY_ID};
use crate::error::{ConfigError, GatewayError, StoreError, VerificationError};
use crate::mailer::Mailer;
use crate::observe::{DebugLog, GatewayMetrics};
use crate::reconcile::{Outcome, Reconciler, RejectReason, DEFAULT_HOST_TIMEOUT};
use crate::reference::{InvoiceReference, OrderId};
use crate::store::{Order, OrderStore};
use crate::token::TokenRequester;
use crate::verifier::{HmacSha256Authenticator, NotificationVerifier, RawNotification};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedirectInstruction {
    pub redirect_url: String,
}

/// How the gateway presents itself in the host's payment method list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayListing {
    pub id: &'static str,
    pub title: String,
    pub description: String,
    pub available: bool,
}

/// Why a notification was not accepted. Every variant answers non-2xx so the
/// provider never treats a bogus notification as delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refusal {
    Verification(VerificationError),
    OrderNotFound(OrderId),
    Mismatch { expected: OrderId, reference: InvoiceReference },
    Rejected(RejectReason),
    Store(StoreError),
}

impl Refusal {
    pub fn label(&self) -> &'static str {
        match self {
            Refusal::Verification(err) => err.code(),
            Refusal::OrderNotFound(_) => "order_not_found",
            Refusal::Mismatch { .. } => "reference_mismatch",
            Refusal::Rejected(RejectReason::UnknownStatus(_)) => "unknown_status",
            Refusal::Rejected(RejectReason::AmountMismatch { .. }) => "amount_mismatch",
            Refusal::Store(_) => "order_store_unavailable",
        }
    }
}

impl From<Refusal> for ApiError {
    fn from(refusal: Refusal) -> Self {
        let code = refusal.label();
        match refusal {
            Refusal::Verification(VerificationError::BadSignature) => ApiError::Unauthorized { code, trace_id: None },
            Refusal::Verification(err) => ApiError::BadRequest { code, trace_id: None, message: Some(err.to_string()) },
            Refusal::OrderNotFound(_) => ApiError::NotFound { code, trace_id: None },
            Refusal::Mismatch { .. } | Refusal::Rejected(RejectReason::AmountMismatch { .. }) => {
                ApiError::Conflict { code, trace_id: None, message: None }
            }
            Refusal::Rejected(RejectReason::UnknownStatus(status)) => ApiError::Unprocessable {
                code,
                trace_id: None,
                message: Some(format!("unsupported status '{status}'")),
            },
            Refusal::Store(_) => ApiError::Unavailable { code, trace_id: None, message: None },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationReply {
    /// Answer 200 with an empty body. Covers duplicates (`Outcome::Ignored`).
    Accepted(Outcome),
    Refused(Refusal),
}

impl NotificationReply {
    pub fn status(&self) -> StatusCode {
        match self {
            NotificationReply::Accepted(_) => StatusCode::OK,
            NotificationReply::Refused(refusal) => ApiError::from(refusal.clone()).status(),
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        let code = err.code();
        let message = Some(err.buyer_message().to_string());
        match err {
            GatewayError::Config(_) => ApiError::BadRequest { code, trace_id: None, message },
            GatewayError::Provider(ref p) if p.is_retryable() => ApiError::Unavailable { code, trace_id: None, message },
            GatewayError::Provider(_) => ApiError::BadGateway { code, trace_id: None, message },
            GatewayError::Store(_) => ApiError::Unavailable { code, trace_id: None, message },
        }
    }
}

pub struct KomerciGateway {
    config: Arc<GatewayConfig>,
    tokens: TokenRequester,
    verifier: NotificationVerifier,
    reconciler: Reconciler,
    store: Arc<dyn OrderStore>,
    mailer: Arc<dyn Mailer>,
    metrics: GatewayMetrics,
    host_timeout: Duration,
}

impl KomerciGateway {
    pub fn new(
        config: GatewayConfig,
        tokens: TokenRequester,
        verifier: NotificationVerifier,
        store: Arc<dyn OrderStore>,
        mailer: Arc<dyn Mailer>,
        metrics: GatewayMetrics,
    ) -> Self {
        let reconciler = Reconciler::new(store.clone(), mailer.clone(), config.invoice_prefix.clone())
            .with_metrics(metrics.clone());
        Self {
            config: Arc::new(config),
            tokens: tokens.with_metrics(metrics.clone()),
            verifier,
            reconciler,
            store,
            mailer,
            metrics,
            host_timeout: DEFAULT_HOST_TIMEOUT,
        }
    }

    /// Bounds host store and mail calls, including those made under the per-order lock.
    pub fn with_host_timeout(mut self, timeout: Duration) -> Self {
        self.reconciler = self.reconciler.with_host_timeout(timeout);
        self.host_timeout = timeout;
        self
    }

    /// Wires the HMAC authenticator and the HTTP token requester from settings.
    pub fn from_settings(
        settings: &Settings,
        store: Arc<dyn OrderStore>,
        mailer: Arc<dyn Mailer>,
        metrics: GatewayMetrics,
    ) -> Result<Self, ConfigError> {
        if settings.provider.shared_secret.trim().is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        let tokens = TokenRequester::new(&settings.provider)?;
        let verifier = NotificationVerifier::new(Arc::new(HmacSha256Authenticator::new(
            settings.provider.shared_secret.as_bytes(),
        )));
        let mut config = settings.gateway.clone();
        if !config.is_valid_for_use(&settings.store_currency) {
            warn!(store_currency = %settings.store_currency, "Store currency is not accepted; Komerci disabled");
            config.enabled = false;
        }
        Ok(Self::new(config, tokens, verifier, store, mailer, metrics).with_host_timeout(settings.host_timeout))
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn listing(&self, store_currency: &CurrencyCode, buyer_country: Option<&str>) -> GatewayListing {
        let available = self.config.enabled
            && self.config.is_valid_for_use(store_currency)
            && buyer_country.map_or(true, |country| self.config.accepts_country(country));
        GatewayListing {
            id: GATEWAY_ID,
            title: self.config.title.clone(),
            description: self.config.description.clone(),
            available,
        }
    }

    pub async fn initiate_payment(&self, order: &Order) -> Result<RedirectInstruction, GatewayError> {
        let log = DebugLog::new(self.config.debug);
        if !self.config.enabled {
            log.add(format_args!("Refusing order {}: gateway disabled", order.id));
            return Err(ConfigError::Disabled.into());
        }
        let token = self.tokens.request_token(order, &self.config, &log).await?;

        match tokio::time::timeout(self.host_timeout, self.store.empty_cart(order.id)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(order_id = %order.id, error = %err, "Failed to empty cart after token issue"),
            Err(_) => warn!(order_id = %order.id, "Emptying cart timed out"),
        }
        info!(order_id = %order.id, "Redirecting buyer to Komerci");
        Ok(RedirectInstruction { redirect_url: token.redirect_url })
    }

    pub async fn handle_notification(&self, raw: &RawNotification) -> NotificationReply {
        let log = DebugLog::new(self.config.debug);
        log.add("Checking IPN request...");
        let reply = self.process_notification(raw, &log).await;
        let label = match &reply {
            NotificationReply::Accepted(outcome) => outcome.label(),
            NotificationReply::Refused(refusal) => refusal.label(),
        };
        self.metrics.record_notification(label);
        if let NotificationReply::Refused(refusal) = &reply {
            warn!(request_id = %log.request_id(), reason = label, "Notification refused");
            if log.enabled() && matches!(refusal, Refusal::Mismatch { .. } | Refusal::Rejected(RejectReason::AmountMismatch { .. })) {
                self.alert_admin(refusal, &log).await;
            }
        }
        reply
    }

    async fn process_notification(&self, raw: &RawNotification, log: &DebugLog) -> NotificationReply {
        let notification = match self.verifier.verify(raw, &self.config) {
            Ok(notification) => notification,
            Err(err) => {
                log.add(format_args!("Invalid IPN request: {err}"));
                return NotificationReply::Refused(Refusal::Verification(err));
            }
        };
        log.add(format_args!("Valid IPN for {} with status {}", notification.reference, notification.status));

        let lookup = tokio::time::timeout(self.host_timeout, self.store.get_order(notification.order_id))
            .await
            .unwrap_or_else(|_| {
                Err(StoreError::Unavailable(format!("fetch order {}: host store timed out", notification.order_id)))
            });
        let order = match lookup {
            Ok(Some(order)) => order,
            Ok(None) => return NotificationReply::Refused(Refusal::OrderNotFound(notification.order_id)),
            Err(err) => {
                warn!(order_id = %notification.order_id, error = %err, "Order lookup failed");
                return NotificationReply::Refused(Refusal::Store(err));
            }
        };

        match self.reconciler.apply(&order, &notification, log).await {
            Ok(Outcome::Mismatch { expected, reference }) => {
                NotificationReply::Refused(Refusal::Mismatch { expected, reference })
            }
            Ok(Outcome::Rejected(reason)) => NotificationReply::Refused(Refusal::Rejected(reason)),
            Ok(outcome) => NotificationReply::Accepted(outcome),
            Err(err) => {
                warn!(order_id = %order.id, error = %err, "Order update failed");
                NotificationReply::Refused(Refusal::Store(err))
            }
        }
    }

    async fn alert_admin(&self, refusal: &Refusal, log: &DebugLog) {
        let body = match refusal {
            Refusal::Mismatch { expected, reference } => {
                format!("Komerci reference {reference} does not match order #{expected}. The notification was refused.")
            }
            Refusal::Rejected(RejectReason::AmountMismatch { expected, received }) => {
                format!("Komerci reported {received} for an order totalling {expected}. The notification was refused.")
            }
            _ => return,
        };
        let subject = format!("Komerci notification refused ({})", refusal.label());
        match tokio::time::timeout(self.host_timeout, self.mailer.send(&subject, "Komerci notification refused", &body)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(error = %err, "Failed to send admin alert mail");
                log.add(format_args!("Admin alert mail failed: {err}"));
            }
            Err(_) => warn!("Admin alert mail timed out"),
        }
    }
}

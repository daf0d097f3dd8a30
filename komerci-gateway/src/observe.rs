use prometheus::{Histogram, HistogramOpts, IntCounterVec, Opts, Registry};
use std::fmt::Display;
use tracing::info;
use uuid::Uuid;

/// Per-request gateway log. Only emits when the merchant turned debug logging on,
/// and tags every line with the request id so one IPN can be followed end to end.
#[derive(Debug, Clone, Copy)]
pub struct DebugLog {
    enabled: bool,
    request_id: Uuid,
}

impl DebugLog {
    pub fn new(enabled: bool) -> Self {
        Self { enabled, request_id: Uuid::new_v4() }
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn add(&self, message: impl Display) {
        if self.enabled {
            info!(target: "komerci", request_id = %self.request_id, "{message}");
        }
    }
}

#[derive(Clone)]
pub struct GatewayMetrics {
    pub registry: Registry,
    pub notifications_total: IntCounterVec,
    pub token_requests_total: IntCounterVec,
    pub transitions_total: IntCounterVec,
    pub token_request_seconds: Histogram,
}

impl GatewayMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let notifications_total = IntCounterVec::new(
            Opts::new("komerci_notifications_total", "Payment notifications by handling result"),
            &["result"],
        )?;
        let token_requests_total = IntCounterVec::new(
            Opts::new("komerci_token_requests_total", "Payment token requests by result"),
            &["result"],
        )?;
        let transitions_total = IntCounterVec::new(
            Opts::new("komerci_transitions_total", "Order status transitions applied from notifications"),
            &["to"],
        )?;
        let token_request_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "komerci_token_request_seconds",
                "Latency of payment token requests to the provider",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;
        registry.register(Box::new(notifications_total.clone()))?;
        registry.register(Box::new(token_requests_total.clone()))?;
        registry.register(Box::new(transitions_total.clone()))?;
        registry.register(Box::new(token_request_seconds.clone()))?;
        Ok(Self { registry, notifications_total, token_requests_total, transitions_total, token_request_seconds })
    }

    pub fn record_notification(&self, result: &str) {
        self.notifications_total.with_label_values(&[result]).inc();
    }

    pub fn record_token_request(&self, result: &str) {
        self.token_requests_total.with_label_values(&[result]).inc();
    }

    pub fn record_transition(&self, to: &str) {
        self.transitions_total.with_label_values(&[to]).inc();
    }
}

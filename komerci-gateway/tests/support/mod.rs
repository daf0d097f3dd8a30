#![allow(dead_code)]

use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use komerci_gateway::config::{GatewayConfig, ProviderConfig};
use komerci_gateway::mailer::Mailer;
use komerci_gateway::observe::GatewayMetrics;
use komerci_gateway::store::InMemoryOrderStore;
use komerci_gateway::token::TokenRequester;
use komerci_gateway::verifier::{HmacSha256Authenticator, Notification, NotificationVerifier, RawNotification};
use komerci_gateway::{InvoiceReference, KomerciGateway, Order, OrderId, OrderStatus, OrderStore, StoreError};

pub const SECRET: &str = "s3cr3t";

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<(String, String, String)>>,
}

impl RecordingMailer {
    pub fn subjects(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(s, _, _)| s.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, subject: &str, title: &str, body: &str) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push((subject.into(), title.into(), body.into()));
        Ok(())
    }
}

/// In-memory store that counts status writes and can stall reads to widen race windows.
#[derive(Default)]
pub struct CountingStore {
    pub inner: InMemoryOrderStore,
    writes: AtomicUsize,
    read_delay: Option<Duration>,
}

impl CountingStore {
    pub fn with_read_delay(delay: Duration) -> Self {
        Self { read_delay: Some(delay), ..Self::default() }
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn status_of(&self, id: u64) -> OrderStatus {
        self.inner.get_order(OrderId(id)).await.unwrap().unwrap().status
    }
}

#[async_trait]
impl OrderStore for CountingStore {
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.get_order(id).await
    }

    async fn set_status(&self, id: OrderId, status: OrderStatus) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set_status(id, status).await
    }

    async fn empty_cart(&self, id: OrderId) -> Result<(), StoreError> {
        self.inner.empty_cart(id).await
    }
}

pub fn order(id: u64, total: &str) -> Order {
    Order {
        id: OrderId(id),
        currency: "BRL".parse().unwrap(),
        total: BigDecimal::from_str(total).unwrap(),
        status: OrderStatus::Pending,
    }
}

pub fn notification(reference: &str, order_id: u64, status: &str, amount: &str) -> Notification {
    Notification {
        reference: InvoiceReference::new(reference),
        order_id: OrderId(order_id),
        status: status.to_string(),
        amount: BigDecimal::from_str(amount).unwrap(),
    }
}

/// Notification fields signed the way the provider signs them.
pub fn signed_fields(secret: &str, fields: &[(&str, &str)]) -> RawNotification {
    let mut raw: RawNotification = fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    let sig = HmacSha256Authenticator::new(secret).sign(&raw).unwrap();
    raw.insert("signature".into(), sig);
    raw
}

/// Form body for the IPN endpoint.
pub fn signed_form(secret: &str, fields: &[(&str, &str)]) -> String {
    signed_fields(secret, fields)
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn provider(token_url: &str) -> ProviderConfig {
    ProviderConfig {
        token_url: token_url.to_string(),
        payment_url: "https://pay.komerci.test/checkout?token=".to_string(),
        notification_url: None,
        shared_secret: SECRET.to_string(),
        timeout: Duration::from_secs(2),
    }
}

pub fn gateway(
    config: GatewayConfig,
    provider: &ProviderConfig,
    store: Arc<dyn OrderStore>,
    mailer: Arc<dyn Mailer>,
) -> KomerciGateway {
    KomerciGateway::new(
        config,
        TokenRequester::new(provider).unwrap(),
        NotificationVerifier::new(Arc::new(HmacSha256Authenticator::new(provider.shared_secret.as_bytes()))),
        store,
        mailer,
        GatewayMetrics::new().unwrap(),
    )
}

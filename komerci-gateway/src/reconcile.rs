//! Order reconciliation: turns a verified notification into at most one order
//! status transition.
//!
//! Transitions only leave `pending`; `paid`, `failed` and `cancelled` are final.
//! The check-and-write runs under a lock keyed by order id, so duplicate
//! deliveries racing each other cannot both observe `pending`. Distinct orders
//! never share a lock. Store calls made under the lock are bounded by the host
//! timeout; expiry surfaces as `StoreError::Unavailable` and releases the lock.

use common_money::{amounts_match, format_amount};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::warn;

use crate::error::StoreError;
use crate::mailer::Mailer;
use crate::observe::{DebugLog, GatewayMetrics};
use crate::reference::{decode, InvoiceReference, OrderId};
use crate::store::{Order, OrderStatus, OrderStore};
use crate::verifier::Notification;

pub const DEFAULT_HOST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    AlreadyFinalized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    UnknownStatus(String),
    AmountMismatch { expected: String, received: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Applied { from: OrderStatus, to: OrderStatus },
    Ignored(IgnoreReason),
    Rejected(RejectReason),
    Mismatch { expected: OrderId, reference: InvoiceReference },
}

impl Outcome {
    /// Label used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Applied { .. } => "applied",
            Outcome::Ignored(_) => "ignored",
            Outcome::Rejected(RejectReason::UnknownStatus(_)) => "unknown_status",
            Outcome::Rejected(RejectReason::AmountMismatch { .. }) => "amount_mismatch",
            Outcome::Mismatch { .. } => "mismatch",
        }
    }
}

/// Provider status vocabulary. Anything not listed here is refused.
pub fn target_status(provider_status: &str) -> Option<OrderStatus> {
    match provider_status.trim().to_ascii_lowercase().as_str() {
        "paid" | "approved" => Some(OrderStatus::Paid),
        "failed" | "declined" => Some(OrderStatus::Failed),
        "cancelled" | "canceled" => Some(OrderStatus::Cancelled),
        _ => None,
    }
}

#[derive(Default)]
pub struct OrderLocks {
    slots: Mutex<HashMap<OrderId, Arc<AsyncMutex<()>>>>,
}

pub struct OrderLockGuard<'a> {
    locks: &'a OrderLocks,
    id: OrderId,
    held: Option<OwnedMutexGuard<()>>,
}

impl OrderLocks {
    pub async fn acquire(&self, id: OrderId) -> OrderLockGuard<'_> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.entry(id).or_default().clone()
        };
        let held = slot.lock_owned().await;
        OrderLockGuard { locks: self, id, held: Some(held) }
    }

    /// Number of orders with a live lock slot.
    pub fn active(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Drop for OrderLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.held.take());
        let mut slots = self.locks.slots.lock().unwrap_or_else(|e| e.into_inner());
        // Only the map still references the slot: nobody holds or waits for it.
        if slots.get(&self.id).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            slots.remove(&self.id);
        }
    }
}

pub struct Reconciler {
    store: Arc<dyn OrderStore>,
    mailer: Arc<dyn Mailer>,
    invoice_prefix: String,
    locks: OrderLocks,
    metrics: Option<GatewayMetrics>,
    host_timeout: Duration,
}

impl Reconciler {
    pub fn new(store: Arc<dyn OrderStore>, mailer: Arc<dyn Mailer>, invoice_prefix: impl Into<String>) -> Self {
        Self {
            store,
            mailer,
            invoice_prefix: invoice_prefix.into(),
            locks: OrderLocks::default(),
            metrics: None,
            host_timeout: DEFAULT_HOST_TIMEOUT,
        }
    }

    pub fn with_host_timeout(mut self, timeout: Duration) -> Self {
        self.host_timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: GatewayMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn locks(&self) -> &OrderLocks {
        &self.locks
    }

    pub async fn apply(&self, order: &Order, notification: &Notification, log: &DebugLog) -> Result<Outcome, StoreError> {
        match decode(notification.reference.as_str(), &self.invoice_prefix) {
            Ok(id) if id == order.id => {}
            _ => {
                log.add(format_args!(
                    "Error: reference {} does not match order {}",
                    notification.reference, order.id
                ));
                return Ok(Outcome::Mismatch { expected: order.id, reference: notification.reference.clone() });
            }
        }

        let (from, to) = {
            let _guard = self.locks.acquire(order.id).await;
            let fresh = self.bounded("fetch", order.id, self.store.get_order(order.id)).await?;
            let current = fresh.as_ref().unwrap_or(order);

            if current.status.is_terminal() {
                log.add(format_args!(
                    "Order {} already {}; ignoring {} notification",
                    order.id,
                    current.status.as_str(),
                    notification.status
                ));
                return Ok(Outcome::Ignored(IgnoreReason::AlreadyFinalized));
            }

            let Some(target) = target_status(&notification.status) else {
                log.add(format_args!("Unknown status '{}' for order {}", notification.status, order.id));
                return Ok(Outcome::Rejected(RejectReason::UnknownStatus(notification.status.clone())));
            };

            if target == OrderStatus::Paid && !amounts_match(&current.total, &notification.amount) {
                let expected = format_amount(&current.total);
                let received = format_amount(&notification.amount);
                log.add(format_args!(
                    "Order {} expects {expected} but notification reports {received}",
                    order.id
                ));
                return Ok(Outcome::Rejected(RejectReason::AmountMismatch { expected, received }));
            }

            self.bounded("update", order.id, self.store.set_status(order.id, target)).await?;
            (current.status, target)
        };

        log.add(format_args!("Order {} moved {} -> {}", order.id, from.as_str(), to.as_str()));
        if let Some(metrics) = &self.metrics {
            metrics.record_transition(to.as_str());
        }
        self.notify_transition(order.id, &notification.reference, to, log).await;
        Ok(Outcome::Applied { from, to })
    }

    async fn bounded<T>(
        &self,
        action: &str,
        id: OrderId,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.host_timeout, call)
            .await
            .map_err(|_| StoreError::Unavailable(format!("{action} order {id}: host store timed out")))?
    }

    async fn notify_transition(&self, id: OrderId, reference: &InvoiceReference, to: OrderStatus, log: &DebugLog) {
        let (subject, title, body) = match to {
            OrderStatus::Paid => (
                format!("Order #{id} paid"),
                "Payment confirmed",
                format!("Komerci confirmed the payment of order #{id} (reference {reference})."),
            ),
            OrderStatus::Failed => (
                format!("Order #{id} payment failed"),
                "Payment failed",
                format!("Komerci reported that the payment of order #{id} (reference {reference}) failed."),
            ),
            OrderStatus::Cancelled => (
                format!("Order #{id} payment cancelled"),
                "Payment cancelled",
                format!("Komerci reported that the payment of order #{id} (reference {reference}) was cancelled."),
            ),
            OrderStatus::Pending => return,
        };
        match tokio::time::timeout(self.host_timeout, self.mailer.send(&subject, title, &body)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(order_id = %id, error = %err, "Failed to send transition mail");
                log.add(format_args!("Mail for order {id} failed: {err}"));
            }
            Err(_) => {
                warn!(order_id = %id, "Transition mail timed out");
                log.add(format_args!("Mail for order {id} timed out"));
            }
        }
    }
}

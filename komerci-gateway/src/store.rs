use async_trait::async_trait;
use bigdecimal::BigDecimal;
use common_money::CurrencyCode;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::reference::OrderId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Paid, failed and cancelled orders never move again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub currency: CurrencyCode,
    pub total: BigDecimal,
    pub status: OrderStatus,
}

/// The host platform's order storage. The gateway only reads orders and asks for changes.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, StoreError>;
    async fn set_status(&self, id: OrderId, status: OrderStatus) -> Result<(), StoreError>;
    /// Empties the cart of the buyer who placed `id`.
    async fn empty_cart(&self, id: OrderId) -> Result<(), StoreError>;
}

#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
    emptied_carts: Arc<RwLock<Vec<OrderId>>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, order: Order) {
        self.orders.write().await.insert(order.id, order);
    }

    pub async fn emptied_carts(&self) -> Vec<OrderId> {
        self.emptied_carts.read().await.clone()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn set_status(&self, id: OrderId, status: OrderStatus) -> Result<(), StoreError> {
        let mut guard = self.orders.write().await;
        let order = guard
            .get_mut(&id)
            .ok_or_else(|| StoreError::Rejected(format!("order {id} not found")))?;
        order.status = status;
        Ok(())
    }

    async fn empty_cart(&self, id: OrderId) -> Result<(), StoreError> {
        self.emptied_carts.write().await.push(id);
        Ok(())
    }
}

/// Order store backed by the host platform's REST API.
#[derive(Clone)]
pub struct HttpOrderStore {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct StatusUpdate {
    status: OrderStatus,
}

impl HttpOrderStore {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self { client, base_url: base_url.into().trim_end_matches('/').to_string() }
    }

    fn order_url(&self, id: OrderId) -> String {
        format!("{}/orders/{}", self.base_url, id)
    }
}

fn unavailable(err: reqwest::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn check_status(status: StatusCode, action: &str, id: OrderId) -> Result<(), StoreError> {
    if status.is_success() {
        Ok(())
    } else if status.is_server_error() {
        Err(StoreError::Unavailable(format!("{action} order {id}: host returned {status}")))
    } else {
        Err(StoreError::Rejected(format!("{action} order {id}: host returned {status}")))
    }
}

#[async_trait]
impl OrderStore for HttpOrderStore {
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let resp = self.client.get(self.order_url(id)).send().await.map_err(unavailable)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        check_status(resp.status(), "fetch", id)?;
        resp.json::<Order>()
            .await
            .map(Some)
            .map_err(|err| StoreError::Rejected(format!("invalid order payload: {err}")))
    }

    async fn set_status(&self, id: OrderId, status: OrderStatus) -> Result<(), StoreError> {
        let resp = self
            .client
            .put(format!("{}/status", self.order_url(id)))
            .json(&StatusUpdate { status })
            .send()
            .await
            .map_err(unavailable)?;
        check_status(resp.status(), "update", id)
    }

    async fn empty_cart(&self, id: OrderId) -> Result<(), StoreError> {
        let resp = self
            .client
            .delete(format!("{}/cart", self.order_url(id)))
            .send()
            .await
            .map_err(unavailable)?;
        check_status(resp.status(), "empty cart for", id)
    }
}

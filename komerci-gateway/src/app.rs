use std::sync::Arc;

use axum::http::{header::{ACCEPT, CONTENT_TYPE}, HeaderValue, Method};
use axum::{middleware, routing::{get, post}, Router};
use common_http_errors::http_error_metrics_layer;
use common_money::CurrencyCode;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::gateway::KomerciGateway;
use crate::payment_handlers::{gateway_listing, health, initiate_payment, komerci_notification, metrics};
use crate::store::OrderStore;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<KomerciGateway>,
    pub store: Arc<dyn OrderStore>,
    pub store_currency: CurrencyCode,
}

pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(
            allowed_origins
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok())
                .collect::<Vec<_>>(),
        ))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([ACCEPT, CONTENT_TYPE]);

    Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics))
        .route("/gateways/komerci", get(gateway_listing))
        .route("/orders/:order_id/payment", post(initiate_payment))
        .route("/wc-api/komerci", post(komerci_notification))
        .layer(middleware::from_fn(http_error_metrics_layer("komerci-gateway")))
        .layer(cors)
        .with_state(state)
}

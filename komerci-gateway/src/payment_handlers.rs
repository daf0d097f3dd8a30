use axum::{
    extract::{Path, Query, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use common_http_errors::{ApiError, ApiResult, HTTP_ERROR_REGISTRY};
use common_money::CurrencyCode;
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::app::AppState;
use crate::error::GatewayError;
use crate::gateway::{GatewayListing, NotificationReply};
use crate::reference::OrderId;
use crate::verifier::RawNotification;

#[derive(Debug, Serialize)]
pub struct PaymentResult {
    pub result: &'static str,
    pub redirect: String,
}

#[derive(Debug, Deserialize)]
pub struct ListingQuery {
    pub currency: Option<String>,
    pub country: Option<String>,
}

pub async fn health() -> &'static str {
    "ok"
}

/// Provider IPN endpoint: 200 with an empty body when accepted, error envelope otherwise.
pub async fn komerci_notification(
    State(state): State<AppState>,
    Form(raw): Form<RawNotification>,
) -> Response {
    match state.gateway.handle_notification(&raw).await {
        NotificationReply::Accepted(_) => StatusCode::OK.into_response(),
        NotificationReply::Refused(refusal) => ApiError::from(refusal).into_response(),
    }
}

pub async fn initiate_payment(
    State(state): State<AppState>,
    Path(order_id): Path<u64>,
) -> ApiResult<Json<PaymentResult>> {
    let order_id = OrderId(order_id);
    let order = state
        .store
        .get_order(order_id)
        .await
        .map_err(|err| ApiError::from(GatewayError::Store(err)))?
        .ok_or(ApiError::NotFound { code: "order_not_found", trace_id: None })?;
    if order.status.is_terminal() {
        return Err(ApiError::Conflict {
            code: "order_not_pending",
            trace_id: None,
            message: Some(format!("order is already {}", order.status.as_str())),
        });
    }

    let redirect = state.gateway.initiate_payment(&order).await.map_err(|err| {
        warn!(order_id = %order_id, error = %err, "Payment initiation failed");
        ApiError::from(err)
    })?;
    Ok(Json(PaymentResult { result: "success", redirect: redirect.redirect_url }))
}

pub async fn gateway_listing(
    State(state): State<AppState>,
    Query(query): Query<ListingQuery>,
) -> ApiResult<Json<GatewayListing>> {
    let currency = match query.currency.as_deref() {
        Some(raw) => raw
            .parse::<CurrencyCode>()
            .map_err(|_| ApiError::bad_request("invalid_currency", None))?,
        None => state.store_currency.clone(),
    };
    Ok(Json(state.gateway.listing(&currency, query.country.as_deref())))
}

pub async fn metrics(State(state): State<AppState>) -> ApiResult<Response> {
    let mut families = state.gateway.metrics().registry.gather();
    families.extend(HTTP_ERROR_REGISTRY.gather());
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&families, &mut buffer)
        .map_err(|err| ApiError::internal(err, None))?;
    Ok(([(CONTENT_TYPE, encoder.format_type().to_string())], buffer).into_response())
}

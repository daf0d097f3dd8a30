use axum::{
    extract::Request,
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")] pub trace_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")] pub message: Option<String>,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest { code: &'static str, trace_id: Option<Uuid>, message: Option<String> },
    Unauthorized { code: &'static str, trace_id: Option<Uuid> },
    NotFound { code: &'static str, trace_id: Option<Uuid> },
    Conflict { code: &'static str, trace_id: Option<Uuid>, message: Option<String> },
    Unprocessable { code: &'static str, trace_id: Option<Uuid>, message: Option<String> },
    BadGateway { code: &'static str, trace_id: Option<Uuid>, message: Option<String> },
    Unavailable { code: &'static str, trace_id: Option<Uuid>, message: Option<String> },
    Internal { trace_id: Option<Uuid>, message: Option<String> },
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(e: E, trace_id: Option<Uuid>) -> Self { Self::Internal { trace_id, message: Some(e.to_string()) } }
    pub fn bad_request(code: &'static str, trace_id: Option<Uuid>) -> Self { Self::BadRequest { code, trace_id, message: None } }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::BadGateway { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest { code, .. }
            | ApiError::Unauthorized { code, .. }
            | ApiError::NotFound { code, .. }
            | ApiError::Conflict { code, .. }
            | ApiError::Unprocessable { code, .. }
            | ApiError::BadGateway { code, .. }
            | ApiError::Unavailable { code, .. } => code,
            ApiError::Internal { .. } => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_code = self.code();
        let (trace_id, message) = match self {
            ApiError::Unauthorized { trace_id, .. } | ApiError::NotFound { trace_id, .. } => (trace_id, None),
            ApiError::BadRequest { trace_id, message, .. }
            | ApiError::Conflict { trace_id, message, .. }
            | ApiError::Unprocessable { trace_id, message, .. }
            | ApiError::BadGateway { trace_id, message, .. }
            | ApiError::Unavailable { trace_id, message, .. }
            | ApiError::Internal { trace_id, message } => (trace_id, message),
        };
        let body = ErrorBody { code: error_code.into(), trace_id, message };
        let mut resp = (status, Json(body)).into_response();
        if let Ok(val) = HeaderValue::from_str(error_code) {
            resp.headers_mut().insert("X-Error-Code", val);
        }
        resp
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

// --- Error metrics ---
const MAX_ERROR_CODES: usize = 40;
const OVERFLOW_CODE: &str = "overflow";

pub static HTTP_ERROR_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static HTTP_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let v = IntCounterVec::new(
        Opts::new("http_errors_total", "Count of HTTP error responses emitted (status >= 400)"),
        &["service", "code", "status"],
    ).expect("static metric definition");
    HTTP_ERROR_REGISTRY.register(Box::new(v.clone())).ok();
    v
});

static DISTINCT_CODES: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("http_error_codes_distinct", "Distinct X-Error-Code values observed").expect("static metric definition");
    HTTP_ERROR_REGISTRY.register(Box::new(g.clone())).ok();
    g
});

static OVERFLOW_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("http_error_code_overflow_total", "Error responses whose code exceeded the label guard").expect("static metric definition");
    HTTP_ERROR_REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static SEEN_CODES: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Map an error code to the label actually recorded, capping label cardinality.
pub fn record_error_code(code: &str) -> String {
    let mut seen = SEEN_CODES.lock().unwrap_or_else(|e| e.into_inner());
    if seen.contains(code) {
        return code.to_string();
    }
    if seen.len() >= MAX_ERROR_CODES {
        OVERFLOW_TOTAL.inc();
        return OVERFLOW_CODE.to_string();
    }
    seen.insert(code.to_string());
    DISTINCT_CODES.set(seen.len() as i64);
    code.to_string()
}

pub fn distinct_error_codes() -> i64 { DISTINCT_CODES.get() }

pub fn overflow_total() -> u64 { OVERFLOW_TOTAL.get() }

/// Middleware counting every response with status >= 400 by service, `X-Error-Code` and status.
pub fn http_error_metrics_layer(
    service: &'static str,
) -> impl Fn(Request, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Clone + Send + Sync + 'static {
    move |req: Request, next: Next| {
        Box::pin(async move {
            let resp = next.run(req).await;
            let status = resp.status();
            if status.as_u16() >= 400 {
                let code = resp.headers().get("X-Error-Code").and_then(|v| v.to_str().ok()).unwrap_or("unknown");
                let label = record_error_code(code);
                HTTP_ERRORS_TOTAL.with_label_values(&[service, label.as_str(), status.as_str()]).inc();
            }
            resp
        })
    }
}

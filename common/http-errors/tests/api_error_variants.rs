use common_http_errors::ApiError;
use axum::response::IntoResponse;
use axum::http::StatusCode;
use axum::body::to_bytes;
use uuid::Uuid;

#[test]
fn unauthorized_variant() {
    let err = ApiError::Unauthorized { code: "bad_signature", trace_id: None };
    let resp = err.into_response();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "bad_signature");
}

#[test]
fn bad_request_variant() {
    let err = ApiError::BadRequest { code: "invalid_something", trace_id: None, message: None };
    let resp = err.into_response();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "invalid_something");
}

#[test]
fn not_found_variant() {
    let err = ApiError::NotFound { code: "missing_resource", trace_id: None };
    let resp = err.into_response();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "missing_resource");
}

#[test]
fn conflict_and_unprocessable_variants() {
    let resp = ApiError::Conflict { code: "reference_mismatch", trace_id: None, message: None }.into_response();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let resp = ApiError::Unprocessable { code: "unknown_status", trace_id: None, message: None }.into_response();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "unknown_status");
}

#[test]
fn upstream_variants() {
    let resp = ApiError::BadGateway { code: "provider_rejected", trace_id: None, message: None }.into_response();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let resp = ApiError::Unavailable { code: "provider_unavailable", trace_id: None, message: None }.into_response();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn internal_variant_carries_trace_and_message() {
    let trace = Uuid::new_v4();
    let err = ApiError::Internal { trace_id: Some(trace), message: Some("boom".into()) };
    let resp = err.into_response();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "internal_error");
    let bytes = to_bytes(resp.into_body(), 1024).await.unwrap();
    let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(v["code"], "internal_error");
    assert_eq!(v["message"], "boom");
    assert_eq!(v["trace_id"], trace.to_string());
}

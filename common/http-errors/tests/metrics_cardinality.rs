use common_http_errors::{http_error_metrics_layer, overflow_total, ApiError, HTTP_ERROR_REGISTRY};
use axum::{Router, routing::get, http::StatusCode};
use axum::middleware;
use std::sync::atomic::{AtomicUsize, Ordering};
use tower::ServiceExt; // for oneshot

static DYNAMIC_COUNTER: AtomicUsize = AtomicUsize::new(0);

// Each call fails with a fresh error code so the label guard eventually trips.
async fn dyn_error() -> Result<&'static str, ApiError> {
    let n = DYNAMIC_COUNTER.fetch_add(1, Ordering::Relaxed);
    let code = format!("dyn_code_{}", n);
    Err(ApiError::BadRequest { code: Box::leak(code.into_boxed_str()), trace_id: None, message: None })
}

async fn ok() -> &'static str { "ok" }

#[tokio::test]
async fn error_code_cardinality_guard_caps_labels() {
    let app = Router::new()
        .route("/err", get(dyn_error))
        .route("/ok", get(ok))
        .layer(middleware::from_fn(http_error_metrics_layer("test-svc")));

    for _ in 0..50 {
        let resp = app.clone().oneshot(axum::http::Request::builder().uri("/err").body(axum::body::Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
    let resp = app.clone().oneshot(axum::http::Request::builder().uri("/ok").body(axum::body::Body::empty()).unwrap()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    assert!(overflow_total() >= 10, "expected overflow after 50 distinct codes");
    let families = HTTP_ERROR_REGISTRY.gather();
    let errors = families.iter().find(|f| f.get_name() == "http_errors_total").expect("http_errors_total registered");
    let labelled: usize = errors.get_metric().len();
    assert!(labelled <= 41, "label sets should be capped, got {labelled}");
    let overflow_seen = errors.get_metric().iter().any(|m| {
        m.get_label().iter().any(|l| l.get_name() == "code" && l.get_value() == "overflow")
    });
    assert!(overflow_seen, "overflow label missing");
}

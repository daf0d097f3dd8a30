mod support;

use std::time::Duration;

use httpmock::prelude::*;
use komerci_gateway::config::GatewayConfig;
use komerci_gateway::observe::{DebugLog, GatewayMetrics};
use komerci_gateway::token::TokenRequester;
use komerci_gateway::{ConfigError, GatewayError, ProviderError};
use serde_json::json;
use support::{order, provider};

#[tokio::test]
async fn issued_token_becomes_redirect() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/token")
                .json_body_partial(r#"{"reference":"WC-482","amount":"10.00","amount_minor":1000,"currency":"BRL"}"#);
            then.status(200).json_body(json!({ "token": "tok 482" }));
        })
        .await;
    let metrics = GatewayMetrics::new().unwrap();
    let requester = TokenRequester::new(&provider(&server.url("/token")))
        .unwrap()
        .with_metrics(metrics.clone());

    let token = requester
        .request_token(&order(482, "10.00"), &GatewayConfig::default(), &DebugLog::disabled())
        .await
        .unwrap();
    assert_eq!(token.token, "tok 482");
    assert_eq!(token.redirect_url, "https://pay.komerci.test/checkout?token=tok%20482");
    mock.assert_async().await;
    assert_eq!(metrics.token_requests_total.with_label_values(&["ok"]).get(), 1);
}

#[tokio::test]
async fn payload_filters_reach_the_provider() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/token").json_body_partial(r#"{"installments":"3"}"#);
            then.status(200).json_body(json!({ "token": "t" }));
        })
        .await;
    let requester = TokenRequester::new(&provider(&server.url("/token")))
        .unwrap()
        .with_filter(|mut payload, _order| {
            payload.extra.insert("installments".into(), "3".into());
            payload
        });

    requester
        .request_token(&order(1, "30.00"), &GatewayConfig::default(), &DebugLog::disabled())
        .await
        .unwrap();
    assert_eq!(mock.hits_async().await, 1);
}

#[tokio::test]
async fn client_error_is_a_rejection_with_reason() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/token");
            then.status(422).json_body(json!({ "message": "invalid amount" }));
        })
        .await;
    let requester = TokenRequester::new(&provider(&server.url("/token"))).unwrap();

    let err = requester
        .request_token(&order(482, "10.00"), &GatewayConfig::default(), &DebugLog::disabled())
        .await
        .unwrap_err();
    assert_eq!(err, GatewayError::Provider(ProviderError::Rejected("invalid amount".into())));
    assert_eq!(err.code(), "provider_rejected");
}

#[tokio::test]
async fn success_status_with_error_body_is_a_rejection() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/token");
            then.status(200).json_body(json!({ "error": "merchant suspended" }));
        })
        .await;
    let requester = TokenRequester::new(&provider(&server.url("/token"))).unwrap();

    let err = requester
        .request_token(&order(482, "10.00"), &GatewayConfig::default(), &DebugLog::disabled())
        .await
        .unwrap_err();
    assert_eq!(err, GatewayError::Provider(ProviderError::Rejected("merchant suspended".into())));
}

#[tokio::test]
async fn server_error_is_retryable() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/token");
            then.status(503);
        })
        .await;
    let metrics = GatewayMetrics::new().unwrap();
    let requester = TokenRequester::new(&provider(&server.url("/token")))
        .unwrap()
        .with_metrics(metrics.clone());

    let err = requester
        .request_token(&order(482, "10.00"), &GatewayConfig::default(), &DebugLog::disabled())
        .await
        .unwrap_err();
    match err {
        GatewayError::Provider(p) => assert!(p.is_retryable()),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(metrics.token_requests_total.with_label_values(&["network"]).get(), 1);
}

#[tokio::test]
async fn unparseable_body_is_malformed() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/token");
            then.status(200).body("<html>ok</html>");
        })
        .await;
    let requester = TokenRequester::new(&provider(&server.url("/token"))).unwrap();

    let err = requester
        .request_token(&order(482, "10.00"), &GatewayConfig::default(), &DebugLog::disabled())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Provider(ProviderError::MalformedResponse(_))));
}

#[tokio::test]
async fn empty_token_is_malformed() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/token");
            then.status(200).json_body(json!({ "token": "  " }));
        })
        .await;
    let requester = TokenRequester::new(&provider(&server.url("/token"))).unwrap();

    let err = requester
        .request_token(&order(482, "10.00"), &GatewayConfig::default(), &DebugLog::disabled())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Provider(ProviderError::MalformedResponse(_))));
}

#[tokio::test]
async fn slow_provider_times_out() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/token");
            then.status(200).delay(Duration::from_secs(2)).json_body(json!({ "token": "late" }));
        })
        .await;
    let mut config = provider(&server.url("/token"));
    config.timeout = Duration::from_millis(200);
    let requester = TokenRequester::new(&config).unwrap();

    let err = requester
        .request_token(&order(482, "10.00"), &GatewayConfig::default(), &DebugLog::disabled())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Provider(ProviderError::Network(_))));
}

#[tokio::test]
async fn unsupported_currency_never_calls_provider() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/token");
            then.status(200).json_body(json!({ "token": "t" }));
        })
        .await;
    let requester = TokenRequester::new(&provider(&server.url("/token"))).unwrap();
    let mut usd = order(482, "10.00");
    usd.currency = "USD".parse().unwrap();

    let err = requester
        .request_token(&usd, &GatewayConfig::default(), &DebugLog::disabled())
        .await
        .unwrap_err();
    assert_eq!(err, GatewayError::Config(ConfigError::UnsupportedCurrency("USD".parse().unwrap())));
    assert_eq!(mock.hits_async().await, 0);
}

//! Webhook signature verification (spec.md §8, S6).

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use cortexos_core::Engine;
use cortexos_providers::ProviderRegistry;
use cortexos_server::{app_router, AppState};
use cortexos_tools::ToolRegistry;

fn state_with_secret(secret: &'static str) -> AppState {
    let engine = Engine::new(ProviderRegistry::new(), ToolRegistry::new());
    AppState::new(engine, "webhook", Some(secret.as_bytes().to_vec()))
}

#[tokio::test]
async fn rejects_an_incorrect_signature() {
    let app = app_router(state_with_secret("topsecret"));
    let body = r#"{"x":1}"#;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook")
                .header("content-type", "application/json")
                .header("x-signature-256", "sha256=0000000000000000000000000000000000000000000000000000000000000000")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn accepts_a_correctly_signed_payload() {
    let secret = "topsecret";
    let app = app_router(state_with_secret(secret));
    let body = r#"{"x":1}"#;
    let signature = cortexos_wire::sign(secret.as_bytes(), body.as_bytes());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook")
                .header("content-type", "application/json")
                .header("x-signature-256", signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_signature_header_is_rejected() {
    let app = app_router(state_with_secret("topsecret"));
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook")
                .body(Body::from(r#"{"x":1}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

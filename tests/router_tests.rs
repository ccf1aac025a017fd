//! Route composition tests
//!
//! Drives the full router with `oneshot` and covers:
//! - Notify shape precondition runs before authentication
//! - Wrong method and unknown path handling
//! - Uniform rejection status, including a configured one
//! - Webhook registration through the shared authorizer

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, Bytes, to_bytes},
    http::{HeaderName, Method, Request, StatusCode, header},
};
use notify_gateway::auth::{
    Credential, Principal, StaticSecretValidator, ValidationError, Validator, ValidatorChain,
    ValidatorKind,
};
use notify_gateway::config::{ServerConfig, WebhookConfig};
use notify_gateway::gateway::{AppState, Authorizer, create_router};
use notify_gateway::notify::{NotificationSink, NotifyError};
use notify_gateway::webhook::InMemoryWebhookStore;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tower::ServiceExt;

const SECRET: &str = "shared-secret-1";
const MSGPACK: &str = "application/msgpack";

/// Sink that remembers what it was given
#[derive(Default)]
struct RecordingSink {
    payloads: Mutex<Vec<(String, Bytes)>>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn accept(&self, principal: &Principal, payload: Bytes) -> Result<(), NotifyError> {
        self.payloads.lock().push((principal.validator.clone(), payload));
        Ok(())
    }
}

/// Validator that counts how often the chain consulted it
#[derive(Default)]
struct CountingValidator {
    calls: AtomicUsize,
}

#[async_trait]
impl Validator for CountingValidator {
    fn name(&self) -> &str {
        "counting"
    }

    fn kind(&self) -> ValidatorKind {
        ValidatorKind::SharedSecret
    }

    async fn validate(&self, _credential: &Credential) -> Result<Principal, ValidationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ValidationError::NoMatch)
    }
}

struct Harness {
    app: Router,
    sink: Arc<RecordingSink>,
    webhooks: Arc<InMemoryWebhookStore>,
    counter: Arc<CountingValidator>,
}

fn harness_with_status(status: StatusCode) -> Harness {
    let sink = Arc::new(RecordingSink::default());
    let webhooks = Arc::new(InMemoryWebhookStore::new());
    let counter = Arc::new(CountingValidator::default());

    let chain = ValidatorChain::new(vec![
        counter.clone() as Arc<dyn Validator>,
        Arc::new(StaticSecretValidator::new("secret[0]", SECRET).unwrap()),
    ]);
    let authorizer = Arc::new(Authorizer::new(
        Arc::new(chain),
        HeaderName::from_static("authorization"),
        status,
    ));
    let state = AppState {
        notifier: sink.clone(),
        webhooks: webhooks.clone(),
        webhook_config: WebhookConfig::default(),
    };

    Harness {
        app: create_router(state, authorizer, &ServerConfig::default()),
        sink,
        webhooks,
        counter,
    }
}

fn harness() -> Harness {
    harness_with_status(StatusCode::FORBIDDEN)
}

fn notify_request(credential: Option<&str>, content_types: &[&str], body: &'static [u8]) -> Request<Body> {
    let mut builder = Request::builder().method(Method::POST).uri("/api/v3/notify");
    for content_type in content_types {
        builder = builder.header(header::CONTENT_TYPE, *content_type);
    }
    if let Some(credential) = credential {
        builder = builder.header(header::AUTHORIZATION, credential);
    }
    builder.body(Body::from(body)).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ============================================================================
// Notify route
// ============================================================================

/// Valid secret with a single msgpack content type is accepted
#[tokio::test]
async fn notify_with_valid_secret_is_accepted() {
    let h = harness();
    let response = h
        .app
        .oneshot(notify_request(Some(SECRET), &[MSGPACK], b"\x81\xa1a\x01"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let payloads = h.sink.payloads.lock();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].0, "secret[0]");
    assert_eq!(&payloads[0].1[..], b"\x81\xa1a\x01");
}

/// Two Content-Type headers never reach authentication or the sink
#[tokio::test]
async fn notify_with_two_content_types_is_not_found_before_auth() {
    let h = harness();
    let response = h
        .app
        .oneshot(notify_request(Some(SECRET), &[MSGPACK, MSGPACK], b"\x01"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(h.counter.calls.load(Ordering::SeqCst), 0);
    assert!(h.sink.payloads.lock().is_empty());
}

/// A non-msgpack or missing content type is a route mismatch
#[tokio::test]
async fn notify_without_msgpack_is_not_found() {
    for content_types in [&["application/json"][..], &[][..]] {
        let h = harness();
        let response = h
            .app
            .oneshot(notify_request(Some(SECRET), content_types, b"{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{content_types:?}");
        assert_eq!(h.counter.calls.load(Ordering::SeqCst), 0);
    }
}

/// Wrong credential and missing credential get the same answer
#[tokio::test]
async fn rejected_credentials_share_one_status() {
    for credential in [Some("wrong"), None, Some("Bearer not.a.token")] {
        let h = harness();
        let response = h
            .app
            .oneshot(notify_request(credential, &[MSGPACK], b"\x01"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN, "{credential:?}");
        assert_eq!(json_body(response).await, json!({"error": "Forbidden"}));
        assert_eq!(h.counter.calls.load(Ordering::SeqCst), 1);
        assert!(h.sink.payloads.lock().is_empty());
    }
}

/// The configured rejection status is used verbatim
#[tokio::test]
async fn configured_rejection_status_is_respected() {
    let h = harness_with_status(StatusCode::UNAUTHORIZED);
    let response = h
        .app
        .oneshot(notify_request(Some("wrong"), &[MSGPACK], b"\x01"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

/// GET on the notify path is 405 and does not run the chain
#[tokio::test]
async fn wrong_method_is_method_not_allowed() {
    let h = harness();
    let request = Request::builder()
        .method(Method::GET)
        .uri("/api/v3/notify")
        .header(header::CONTENT_TYPE, MSGPACK)
        .header(header::AUTHORIZATION, SECRET)
        .body(Body::empty())
        .unwrap();

    let response = h.app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(h.counter.calls.load(Ordering::SeqCst), 0);
}

/// Empty payloads are refused by the handler after authentication
#[tokio::test]
async fn empty_notify_payload_is_bad_request() {
    let h = harness();
    let response = h
        .app
        .oneshot(notify_request(Some(SECRET), &[MSGPACK], b""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// Hook route and fallback
// ============================================================================

fn hook_request(credential: &str, body: &'static str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/hook")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, credential)
        .body(Body::from(body))
        .unwrap()
}

/// Registration records the validator that admitted the caller
#[tokio::test]
async fn hook_registration_succeeds() {
    let h = harness();
    let body = r#"{"config": {"url": "https://consumer.example.com/events"}, "events": ["device-status"]}"#;
    let response = h.app.oneshot(hook_request(SECRET, body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({"message": "Success"}));

    let active = h.webhooks.active(SystemTime::now());
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].registered_by, "secret[0]");
}

/// Invalid JSON from an authenticated caller is a 400
#[tokio::test]
async fn hook_with_invalid_body_is_bad_request() {
    let h = harness();
    let response = h.app.oneshot(hook_request(SECRET, "{not json")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(h.webhooks.is_empty());
}

/// The hook route shares the authorizer with notify
#[tokio::test]
async fn hook_requires_authentication() {
    let h = harness();
    let response = h.app.oneshot(hook_request("wrong", "{}")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(h.webhooks.is_empty());
}

/// Unknown paths are 404 without consulting the chain
#[tokio::test]
async fn unknown_path_is_not_found() {
    let h = harness();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v2/notify")
        .header(header::AUTHORIZATION, SECRET)
        .body(Body::empty())
        .unwrap();

    let response = h.app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(h.counter.calls.load(Ordering::SeqCst), 0);
}

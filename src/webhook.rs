//! Webhook registration endpoint.
//!
//! `POST /hook` takes a JSON registration, validates it and hands it to a
//! [`WebhookService`]. The handler reports its own success or failure; by
//! the time it runs the caller is already authenticated.
//!
//! Request body:
//!
//! ```json
//! {
//!   "config": { "url": "https://consumer.example.com/events", "content_type": "application/json", "secret": "s3cr3t" },
//!   "events": ["device-status"],
//!   "matcher": { "device_id": ["mac:112233445566"] },
//!   "duration": 300
//! }
//! ```

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use telemetry_metrics::counter;
use thiserror::Error;
use tracing::{Instrument, error, info, warn};
use url::Url;

use crate::config::WebhookConfig;
use crate::gateway::{AppState, RequestContext};

/// Where and how events are delivered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Consumer endpoint
    pub url: String,
    /// Content type events are delivered as
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// Secret used to sign deliveries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

fn default_content_type() -> String {
    "application/json".to_string()
}

/// Device filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Matcher {
    /// Device ids to match (empty = all)
    #[serde(default)]
    pub device_id: Vec<String>,
}

/// A registration request as sent by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookRegistration {
    /// Delivery settings
    pub config: DeliveryConfig,
    /// Event types to deliver
    pub events: Vec<String>,
    /// Device filter
    #[serde(default)]
    pub matcher: Matcher,
    /// Requested lifetime in seconds
    #[serde(default)]
    pub duration: Option<u64>,
}

impl WebhookRegistration {
    /// Check the request and work out its lifetime.
    pub fn validate(&self, limits: &WebhookConfig) -> Result<Duration, WebhookError> {
        let url = Url::parse(&self.config.url)
            .map_err(|e| WebhookError::Invalid(format!("config.url: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(WebhookError::Invalid(format!(
                "config.url: unsupported scheme {:?}",
                url.scheme()
            )));
        }
        if self.events.is_empty() || self.events.iter().any(String::is_empty) {
            return Err(WebhookError::Invalid(
                "events must list at least one non-empty event".to_string(),
            ));
        }

        let requested = match self.duration {
            Some(0) => return Err(WebhookError::Invalid("duration must be positive".to_string())),
            Some(secs) => Duration::from_secs(secs),
            None => limits.default_ttl,
        };
        Ok(requested.min(limits.max_ttl))
    }
}

/// A stored registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Webhook {
    /// What was asked for
    pub registration: WebhookRegistration,
    /// Validator label of the registering principal
    pub registered_by: String,
    /// When the registration lapses
    pub expires_at: SystemTime,
}

impl Webhook {
    /// Whether the registration has lapsed at `now`.
    #[must_use]
    pub fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }
}

/// Webhook registration failures
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Request body was not a valid registration
    #[error("invalid registration: {0}")]
    Invalid(String),

    /// The registration service failed
    #[error("webhook store failure: {0}")]
    Store(String),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        match self {
            Self::Invalid(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "message": message }))).into_response()
            }
            Self::Store(detail) => {
                error!(error = %detail, "Webhook registration failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "message": "failed to register webhook" })),
                )
                    .into_response()
            }
        }
    }
}

/// Registration backend
#[async_trait]
pub trait WebhookService: Send + Sync {
    /// Add or replace the registration for a consumer URL.
    async fn add_webhook(&self, webhook: Webhook) -> Result<(), WebhookError>;
}

/// Process-local registry keyed by consumer URL.
#[derive(Debug, Default)]
pub struct InMemoryWebhookStore {
    hooks: DashMap<String, Webhook>,
}

impl InMemoryWebhookStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registrations still live at `now`
    #[must_use]
    pub fn active(&self, now: SystemTime) -> Vec<Webhook> {
        self.hooks
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Drop lapsed registrations, returning how many were removed.
    pub fn purge_expired(&self, now: SystemTime) -> usize {
        let mut removed = 0;
        self.hooks.retain(|_, hook| {
            let keep = !hook.is_expired(now);
            removed += usize::from(!keep);
            keep
        });
        removed
    }

    /// Number of stored registrations, lapsed or not
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

#[async_trait]
impl WebhookService for InMemoryWebhookStore {
    async fn add_webhook(&self, webhook: Webhook) -> Result<(), WebhookError> {
        self.purge_expired(SystemTime::now());
        self.hooks.insert(webhook.registration.config.url.clone(), webhook);
        Ok(())
    }
}

/// `POST /hook`
pub async fn add_webhook_handler(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: Bytes,
) -> Result<Json<serde_json::Value>, WebhookError> {
    let result = register(&state, &ctx, &body)
        .instrument(ctx.span.clone())
        .await;
    let outcome = match &result {
        Ok(()) => "registered",
        Err(WebhookError::Invalid(reason)) => {
            warn!(parent: &ctx.span, reason = %reason, "Rejected webhook registration");
            "invalid"
        }
        Err(WebhookError::Store(_)) => "failed",
    };
    counter!("notify_gateway_webhook_registrations_total", "outcome" => outcome).increment(1);

    result.map(|()| Json(json!({ "message": "Success" })))
}

async fn register(state: &AppState, ctx: &RequestContext, body: &[u8]) -> Result<(), WebhookError> {
    let registration: WebhookRegistration = serde_json::from_slice(body)
        .map_err(|e| WebhookError::Invalid(format!("invalid JSON: {e}")))?;
    let ttl = registration.validate(&state.webhook_config)?;

    let webhook = Webhook {
        registration,
        registered_by: ctx.principal.validator.clone(),
        expires_at: SystemTime::now() + ttl,
    };
    let url = webhook.registration.config.url.clone();
    state.webhooks.add_webhook(webhook).await?;

    info!(url = %url, ttl_secs = ttl.as_secs(), "Webhook registered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn registration(url: &str, duration: Option<u64>) -> WebhookRegistration {
        WebhookRegistration {
            config: DeliveryConfig {
                url: url.to_string(),
                content_type: default_content_type(),
                secret: None,
            },
            events: vec!["device-status".to_string()],
            matcher: Matcher::default(),
            duration,
        }
    }

    #[test]
    fn minimal_body_uses_defaults() {
        let parsed: WebhookRegistration = serde_json::from_str(
            r#"{"config": {"url": "https://consumer.example.com/events"}, "events": ["x"]}"#,
        )
        .unwrap();
        assert_eq!(parsed.config.content_type, "application/json");
        assert_eq!(parsed.matcher, Matcher::default());
        assert_eq!(parsed.duration, None);
    }

    #[test]
    fn lifetime_defaults_and_is_capped() {
        let limits = WebhookConfig::default();
        let url = "https://consumer.example.com/events";

        assert_eq!(registration(url, None).validate(&limits).unwrap(), limits.default_ttl);
        assert_eq!(
            registration(url, Some(60)).validate(&limits).unwrap(),
            Duration::from_secs(60)
        );
        assert_eq!(
            registration(url, Some(1_000_000)).validate(&limits).unwrap(),
            limits.max_ttl
        );
        assert!(registration(url, Some(0)).validate(&limits).is_err());
    }

    #[test]
    fn invalid_registrations_are_rejected() {
        let limits = WebhookConfig::default();
        assert!(registration("not a url", None).validate(&limits).is_err());
        assert!(registration("ftp://consumer.example.com", None).validate(&limits).is_err());

        let mut no_events = registration("https://consumer.example.com", None);
        no_events.events.clear();
        assert!(no_events.validate(&limits).is_err());
    }

    #[tokio::test]
    async fn store_replaces_by_url_and_expires() {
        let store = InMemoryWebhookStore::new();
        let now = SystemTime::now();
        let hook = |by: &str, ttl: u64| Webhook {
            registration: registration("https://consumer.example.com/events", None),
            registered_by: by.to_string(),
            expires_at: now + Duration::from_secs(ttl),
        };

        store.add_webhook(hook("secret[0]", 60)).await.unwrap();
        store.add_webhook(hook("jwt[0]", 60)).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.active(now)[0].registered_by, "jwt[0]");

        let later = now + Duration::from_secs(120);
        assert!(store.active(later).is_empty());
        assert_eq!(store.purge_expired(later), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn purge_counts_only_its_own_removals_under_concurrent_inserts() {
        let store = InMemoryWebhookStore::new();
        let now = SystemTime::now();
        let hook = |url: String, expires_at: SystemTime| Webhook {
            registration: registration(&url, None),
            registered_by: "secret[0]".to_string(),
            expires_at,
        };
        for i in 0..50 {
            let url = format!("https://lapsed-{i}.example.com");
            store.hooks.insert(url.clone(), hook(url, now));
        }

        let removed = std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..500 {
                    let url = format!("https://live-{i}.example.com");
                    store.hooks.insert(url.clone(), hook(url, now + Duration::from_secs(60)));
                }
            });
            let purger = scope.spawn(|| {
                (0..20)
                    .map(|_| store.purge_expired(now + Duration::from_secs(1)))
                    .sum::<usize>()
            });
            purger.join().unwrap()
        });

        assert_eq!(removed, 50);
        assert_eq!(store.len(), 500);
    }

    #[test]
    fn errors_map_to_statuses() {
        assert_eq!(
            WebhookError::Invalid("x".to_string()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            WebhookError::Store("disk".to_string()).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

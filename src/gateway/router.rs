//! HTTP router

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Request},
    http::{StatusCode, header::CONTENT_TYPE},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::json;
use thiserror::Error;
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::debug;

use super::middleware::{Authorizer, authorize};
use crate::config::{ServerConfig, WebhookConfig};
use crate::notify::{NotificationSink, notify_handler};
use crate::webhook::{WebhookService, add_webhook_handler};

/// API base segment
pub const API_BASE: &str = "api";
/// API version segment
pub const API_VERSION: &str = "v3";
/// Notify ingestion path
pub const NOTIFY_PATH: &str = "/api/v3/notify";
/// Webhook registration path
pub const HOOK_PATH: &str = "/hook";
/// Media type the notify endpoint accepts
pub const MSGPACK: &str = "application/msgpack";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    /// Receives notify payloads
    pub notifier: Arc<dyn NotificationSink>,
    /// Registers webhooks
    pub webhooks: Arc<dyn WebhookService>,
    /// Registration lifetime limits
    pub webhook_config: WebhookConfig,
}

/// A request that matched a path but not its shape.
///
/// Answered as not-found so it can never be confused with an auth rejection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no route matches: {reason}")]
pub struct RouteMismatch {
    reason: &'static str,
}

impl RouteMismatch {
    /// Mismatch with a log-only reason
    #[must_use]
    pub fn new(reason: &'static str) -> Self {
        Self { reason }
    }
}

impl IntoResponse for RouteMismatch {
    fn into_response(self) -> Response {
        debug!(reason = self.reason, "Route mismatch");
        (StatusCode::NOT_FOUND, Json(json!({ "error": "Not Found" }))).into_response()
    }
}

/// Whether a `Content-Type` value names `application/msgpack` (parameters allowed).
fn is_msgpack(value: &str) -> bool {
    value
        .split(';')
        .next()
        .is_some_and(|media| media.trim().eq_ignore_ascii_case(MSGPACK))
}

/// Notify shape precondition: exactly one `Content-Type`, and it is msgpack.
async fn require_notify_shape(request: Request, next: Next) -> Result<Response, RouteMismatch> {
    let mut values = request.headers().get_all(CONTENT_TYPE).iter();
    match (values.next(), values.next()) {
        (Some(only), None) if only.to_str().is_ok_and(is_msgpack) => Ok(next.run(request).await),
        (None, _) => Err(RouteMismatch::new("missing content-type")),
        (Some(_), Some(_)) => Err(RouteMismatch::new("multiple content-type headers")),
        (Some(_), None) => Err(RouteMismatch::new("content-type is not msgpack")),
    }
}

/// Create the router.
///
/// Both routes share one [`Authorizer`]. On the notify route the shape
/// precondition is the outer layer, so a mismatched request never reaches
/// authentication. Wrong methods get 405 before either layer runs.
pub fn create_router(state: AppState, authorizer: Arc<Authorizer>, server: &ServerConfig) -> Router {
    let auth = middleware::from_fn_with_state(authorizer, authorize);

    Router::new()
        .route(
            NOTIFY_PATH,
            post(notify_handler)
                .route_layer(auth.clone())
                .route_layer(middleware::from_fn(require_notify_shape)),
        )
        .route(HOOK_PATH, post(add_webhook_handler).route_layer(auth))
        .fallback(|| async { RouteMismatch::new("unknown path") })
        .layer(DefaultBodyLimit::max(server.max_body_size))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::GATEWAY_TIMEOUT,
            server.request_timeout,
        ))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

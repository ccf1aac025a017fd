//! Notify endpoint.
//!
//! Payloads arrive as msgpack and are handed to a [`NotificationSink`]
//! untouched. Decoding and fan-out belong to the sink.

use async_trait::async_trait;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde_json::json;
use telemetry_metrics::counter;
use thiserror::Error;
use tracing::{Instrument, error, info};

use crate::auth::Principal;
use crate::gateway::{AppState, RequestContext};

/// Errors a sink may report
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Request body was empty
    #[error("empty notification payload")]
    EmptyPayload,

    /// Downstream could not take the payload right now
    #[error("notification sink unavailable: {0}")]
    Unavailable(String),
}

impl IntoResponse for NotifyError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::EmptyPayload => StatusCode::BAD_REQUEST,
            Self::Unavailable(detail) => {
                error!(error = %detail, "Notification sink unavailable");
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        let message = status.canonical_reason().unwrap_or("error");
        (status, Json(json!({ "message": message }))).into_response()
    }
}

/// Accepts authenticated notification payloads.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Take ownership of one payload.
    async fn accept(&self, principal: &Principal, payload: Bytes) -> Result<(), NotifyError>;
}

/// Sink that records each payload in the log and drops it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

#[async_trait]
impl NotificationSink for LoggingSink {
    async fn accept(&self, principal: &Principal, payload: Bytes) -> Result<(), NotifyError> {
        info!(
            validator = %principal.validator,
            subject = principal.subject.as_deref().unwrap_or("-"),
            bytes = payload.len(),
            "Notification accepted"
        );
        Ok(())
    }
}

/// `POST /api/v3/notify`
pub async fn notify_handler(
    State(state): State<AppState>,
    ctx: RequestContext,
    payload: Bytes,
) -> Result<StatusCode, NotifyError> {
    if payload.is_empty() {
        counter!("notify_gateway_notifications_total", "outcome" => "empty").increment(1);
        return Err(NotifyError::EmptyPayload);
    }

    #[allow(clippy::cast_precision_loss)]
    let size = payload.len() as f64;
    let result = state
        .notifier
        .accept(&ctx.principal, payload)
        .instrument(ctx.span.clone())
        .await;

    let outcome = if result.is_ok() { "accepted" } else { "failed" };
    counter!("notify_gateway_notifications_total", "outcome" => outcome).increment(1);
    telemetry_metrics::histogram!("notify_gateway_notification_bytes").record(size);

    result.map(|()| StatusCode::ACCEPTED)
}

//! Authentication middleware.
//!
//! Per request: read one header, run the validator chain, then either
//! forward with a [`RequestContext`] or answer with the configured status.
//! A missing header goes through the chain as an empty credential so every
//! rejection looks the same to the caller.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use telemetry_metrics::counter;
use tracing::{Instrument, field, info, info_span, warn};

use super::context::RequestContext;
use super::trace::TraceContext;
use crate::auth::{Credential, ValidatorChain};
use crate::config::AuthConfig;
use crate::{Error, Result};

/// Shared authorization policy: one chain, one header, one rejection status.
#[derive(Debug)]
pub struct Authorizer {
    chain: Arc<ValidatorChain>,
    header_name: HeaderName,
    forbidden_status: StatusCode,
}

impl Authorizer {
    /// Create an authorizer.
    #[must_use]
    pub fn new(chain: Arc<ValidatorChain>, header_name: HeaderName, forbidden_status: StatusCode) -> Self {
        Self {
            chain,
            header_name,
            forbidden_status,
        }
    }

    /// Create from the auth section of the configuration.
    ///
    /// The rejection status must be a 4xx code.
    pub fn from_config(chain: ValidatorChain, config: &AuthConfig) -> Result<Self> {
        let header_name = HeaderName::from_bytes(config.header_name.as_bytes())
            .map_err(|e| Error::config(format!("invalid auth header name {:?}: {e}", config.header_name)))?;
        let forbidden_status = StatusCode::from_u16(config.forbidden_status)
            .ok()
            .filter(StatusCode::is_client_error)
            .ok_or_else(|| {
                Error::config(format!(
                    "forbidden_status must be a 4xx code, got {}",
                    config.forbidden_status
                ))
            })?;

        if chain.is_empty() {
            warn!("No validators configured; every protected request will be rejected");
        }

        Ok(Self::new(Arc::new(chain), header_name, forbidden_status))
    }

    /// The validator chain
    #[must_use]
    pub fn chain(&self) -> &ValidatorChain {
        &self.chain
    }

    /// Header the credential is read from
    #[must_use]
    pub fn header_name(&self) -> &HeaderName {
        &self.header_name
    }

    /// Status returned on rejection
    #[must_use]
    pub fn forbidden_status(&self) -> StatusCode {
        self.forbidden_status
    }

    /// Read the credential. Absent or non-UTF-8 headers give the empty credential.
    #[must_use]
    pub fn credential(&self, headers: &HeaderMap) -> Credential {
        headers
            .get(&self.header_name)
            .and_then(|v| v.to_str().ok())
            .map_or_else(Credential::empty, Credential::from_header_value)
    }

    /// The one response every rejected request gets.
    #[must_use]
    pub fn rejection(&self) -> Response {
        let reason = self.forbidden_status.canonical_reason().unwrap_or("Rejected");
        (self.forbidden_status, Json(json!({ "error": reason }))).into_response()
    }
}

/// Headers rendered for logging, with the credential header redacted.
fn loggable_headers(headers: &HeaderMap, credential_header: &HeaderName) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let shown = if name == credential_header {
                "<redacted>".to_string()
            } else {
                value.to_str().unwrap_or("<binary>").to_string()
            };
            (name.as_str().to_string(), shown)
        })
        .collect()
}

/// Middleware entry point. Mount with
/// `axum::middleware::from_fn_with_state(authorizer, authorize)`.
pub async fn authorize(
    State(authorizer): State<Arc<Authorizer>>,
    mut request: Request,
    next: Next,
) -> Response {
    let trace = TraceContext::from_headers(request.headers());
    let span = info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        trace_id = field::Empty,
        span_id = field::Empty,
        validator = field::Empty,
    );
    if let Some(ctx) = &trace {
        span.record("trace_id", ctx.trace_id.as_str());
        span.record("span_id", ctx.span_id.as_str());
    }

    info!(
        parent: &span,
        headers = ?loggable_headers(request.headers(), authorizer.header_name()),
        "Request received"
    );

    let credential = authorizer.credential(request.headers());
    let verdict = authorizer
        .chain()
        .validate(&credential)
        .instrument(span.clone())
        .await;

    match verdict {
        Ok(principal) => {
            span.record("validator", principal.validator.as_str());
            counter!(
                "notify_gateway_auth_requests_total",
                "outcome" => "accepted",
                "validator" => principal.validator.clone()
            )
            .increment(1);

            request.extensions_mut().insert(RequestContext {
                principal: Arc::new(principal),
                trace,
                span: span.clone(),
            });
            next.run(request).instrument(span).await
        }
        Err(failed) => {
            warn!(parent: &span, reason = %failed, "Request rejected");
            counter!("notify_gateway_auth_requests_total", "outcome" => "rejected").increment(1);
            for failure in &failed.failures {
                counter!(
                    "notify_gateway_auth_validator_failures_total",
                    "validator" => failure.validator.clone(),
                    "code" => failure.error.code()
                )
                .increment(1);
            }
            authorizer.rejection()
        }
    }
}

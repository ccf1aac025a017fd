//! Request-scoped context handed to protected handlers.
//!
//! ```rust,ignore
//! async fn handler(ctx: RequestContext) -> impl IntoResponse {
//!     tracing::info!(parent: &ctx.span, validator = %ctx.principal.validator, "handling");
//! }
//! ```

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
};

use super::trace::TraceContext;
use crate::auth::Principal;

/// Authenticated principal plus request metadata.
///
/// Inserted into request extensions by the auth middleware once the chain
/// accepts the credential. Handlers extract it and never re-authenticate.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Who made the request
    pub principal: Arc<Principal>,
    /// Upstream trace context, when the caller sent one
    pub trace: Option<TraceContext>,
    /// Span carrying method, path, trace ids and validator
    pub span: tracing::Span,
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Missing context means a route was mounted without the auth layer.
        parts.extensions.get::<Self>().cloned().ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            "request context missing",
        ))
    }
}

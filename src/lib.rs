//! Notify Gateway Library
//!
//! Authenticating front door for a notification and webhook-registration
//! service.
//!
//! # Features
//!
//! - **Validator chain**: signed-token (JWS) and shared-secret validators
//!   tried in configured order, first success wins, fail closed
//! - **Key resolution**: static keys, URI-fetched JWKS/PEM, cached with TTL
//! - **Route preconditions**: `POST /api/v3/notify` only for a single
//!   `application/msgpack` content type; `POST /hook` for registrations
//! - **Request context**: principal and W3C trace ids handed to handlers
//!
//! # Example
//!
//! ```rust,ignore
//! let config = notify_gateway::config::Config::load(Some(path))?;
//! notify_gateway::gateway::Gateway::new(config).await?.run().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod notify;
pub mod webhook;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let result = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    result.map_err(|e| Error::Internal(format!("failed to install tracing subscriber: {e}")))
}

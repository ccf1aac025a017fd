//! Distributed-trace identifiers carried by inbound requests.
//!
//! Callers propagate trace context with the W3C `traceparent` header:
//!
//! ```text
//! traceparent: 00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01
//!              ^^ ^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^ ^^^^^^^^^^^^^^^^ ^^
//!         version            trace-id                parent-id     flags
//! ```
//!
//! Parsed ids are attached to the request span and the [`RequestContext`]
//! so every log line for the request can be correlated upstream. A missing
//! or malformed header simply yields no trace context.
//!
//! [`RequestContext`]: super::context::RequestContext

use axum::http::HeaderMap;
use serde::Serialize;

/// Header carrying W3C trace context
pub const TRACEPARENT: &str = "traceparent";

/// Trace and span identifiers from a `traceparent` header
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceContext {
    /// 32 lowercase hex digits
    pub trace_id: String,
    /// 16 lowercase hex digits (the caller's span)
    pub span_id: String,
    /// Whether the caller sampled this trace
    pub sampled: bool,
}

impl TraceContext {
    /// Parse a `traceparent` value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;

        if !is_hex(version, 2) || version == "ff" {
            return None;
        }
        // Version 00 has exactly four fields; later versions may append more.
        if version == "00" && parts.next().is_some() {
            return None;
        }
        if !is_hex(trace_id, 32) || !is_hex(span_id, 16) || !is_hex(flags, 2) {
            return None;
        }
        if is_zero(trace_id) || is_zero(span_id) {
            return None;
        }

        let flags = u8::from_str_radix(flags, 16).ok()?;
        Some(Self {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
            sampled: flags & 0x01 == 0x01,
        })
    }

    /// Extract from request headers, if present and well formed.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(TRACEPARENT)
            .and_then(|v| v.to_str().ok())
            .and_then(Self::parse)
    }
}

fn is_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn is_zero(s: &str) -> bool {
    s.bytes().all(|b| b == b'0')
}

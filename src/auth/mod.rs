//! Credential validation.
//!
//! # Pipeline
//!
//! ```text
//! Credential
//!   -> ValidatorChain (configured order, first success wins)
//!        -> TokenValidator        (JWS signature via KeyResolver + claim rules)
//!        -> StaticSecretValidator (constant-time shared-secret match)
//!   -> Principal | AllFailed
//! ```
//!
//! The chain is built once from [`crate::config::AuthConfig`] and is
//! immutable afterwards. An empty chain rejects everything.

pub mod chain;
pub mod error;
pub mod keys;
pub mod rules;
pub mod secret;
pub mod token;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

pub use chain::ValidatorChain;
pub use error::{AllFailed, KeyError, ValidationError, ValidatorFailure};
pub use keys::{KeyFamily, KeyResolver, RemoteKeyResolver, StaticKeyResolver, VerificationKey};
pub use rules::{ClaimRule, ClaimRules};
pub use secret::StaticSecretValidator;
pub use token::TokenValidator;

/// Authorization scheme a credential was presented under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// `Bearer <token>`
    Bearer,
    /// `Basic <value>`
    Basic,
}

/// A caller-supplied credential, read once per request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    scheme: Option<Scheme>,
    value: String,
}

impl Credential {
    /// A credential presented without a recognised scheme.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            scheme: None,
            value: value.into(),
        }
    }

    /// A `Bearer` credential.
    pub fn bearer(value: impl Into<String>) -> Self {
        Self {
            scheme: Some(Scheme::Bearer),
            value: value.into(),
        }
    }

    /// The credential used when the header is absent or unreadable.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(String::new())
    }

    /// Parse a raw header value.
    ///
    /// `Bearer` and `Basic` prefixes (any case) are split off; anything else
    /// is kept verbatim.
    #[must_use]
    pub fn from_header_value(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some((scheme, rest)) = raw.split_once(' ') {
            let scheme = if scheme.eq_ignore_ascii_case("bearer") {
                Some(Scheme::Bearer)
            } else if scheme.eq_ignore_ascii_case("basic") {
                Some(Scheme::Basic)
            } else {
                None
            };
            if scheme.is_some() {
                return Self {
                    scheme,
                    value: rest.trim().to_string(),
                };
            }
        }
        Self::new(raw)
    }

    /// The scheme, if one was recognised.
    #[must_use]
    pub fn scheme(&self) -> Option<Scheme> {
        self.scheme
    }

    /// The credential value without its scheme.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Whether no credential was supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("scheme", &self.scheme)
            .field("value", &"<redacted>")
            .field("len", &self.value.len())
            .finish()
    }
}

/// Which kind of validator produced a principal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorKind {
    /// Signed token verified against a key resolver
    SignedToken,
    /// Static shared secret
    SharedSecret,
}

impl fmt::Display for ValidatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignedToken => f.write_str("signed_token"),
            Self::SharedSecret => f.write_str("shared_secret"),
        }
    }
}

/// The authenticated caller.
///
/// Lives in the request context for the duration of one request; never
/// persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Principal {
    /// Label of the validator that accepted the credential
    pub validator: String,
    /// Kind of that validator
    pub kind: ValidatorKind,
    /// `sub` claim (signed tokens only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// `iss` claim (signed tokens only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// All verified claims (empty for shared secrets)
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub claims: Map<String, Value>,
}

impl Principal {
    /// Principal for a matched shared secret: no identity beyond "matched".
    pub fn shared_secret(validator: impl Into<String>) -> Self {
        Self {
            validator: validator.into(),
            kind: ValidatorKind::SharedSecret,
            subject: None,
            issuer: None,
            claims: Map::new(),
        }
    }

    /// Principal for a verified token.
    pub fn from_claims(validator: impl Into<String>, claims: Map<String, Value>) -> Self {
        let text = |name: &str| claims.get(name).and_then(Value::as_str).map(str::to_string);
        Self {
            validator: validator.into(),
            kind: ValidatorKind::SignedToken,
            subject: text("sub"),
            issuer: text("iss"),
            claims,
        }
    }
}

/// A single credential verification strategy.
///
/// Implementations must be safe to call concurrently; the chain holds them
/// behind `Arc` for the life of the process.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Label used in logs and on the principal.
    fn name(&self) -> &str;

    /// Kind of credential this validator understands.
    fn kind(&self) -> ValidatorKind;

    /// Verify `credential`, returning the principal on success.
    async fn validate(&self, credential: &Credential) -> Result<Principal, ValidationError>;
}

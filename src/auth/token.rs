//! Signed bearer token validation.
//!
//! # Verification order
//!
//! 1. Decode the header (no trust yet).
//! 2. Pick the key id: header `kid`, else the configured default.
//! 3. Resolve the key and check the header `alg` against it.
//! 4. `jsonwebtoken::decode` verifies the signature, then `exp`, `nbf` and
//!    `iss` through the [`Validation`](jsonwebtoken::Validation) built by
//!    [`ClaimRules`].
//! 5. The remaining [`ClaimRules`] run on the decoded claims.

use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use jsonwebtoken::{decode, decode_header};
use serde_json::{Map, Value};
use tracing::debug;

use super::error::ValidationError;
use super::keys::{KeyResolver, build_resolver};
use super::rules::{ClaimRule, ClaimRules};
use super::{Credential, Principal, Scheme, Validator, ValidatorKind};
use crate::Result;
use crate::config::JwtValidatorConfig;

/// Verifies JWS bearer tokens against one key resolver and one rule set.
pub struct TokenValidator {
    name: String,
    resolver: Arc<dyn KeyResolver>,
    rules: ClaimRules,
    default_key_id: Option<String>,
}

impl TokenValidator {
    /// Create a validator. Tokens without `kid` are rejected until a default
    /// key id is set.
    pub fn new(name: impl Into<String>, resolver: Arc<dyn KeyResolver>, rules: ClaimRules) -> Self {
        Self {
            name: name.into(),
            resolver,
            rules,
            default_key_id: None,
        }
    }

    /// Key id used for tokens whose header has no `kid`.
    #[must_use]
    pub fn with_default_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.default_key_id = Some(key_id.into());
        self
    }

    /// Build from configuration, constructing (and eagerly loading) the key
    /// resolver.
    pub async fn from_config(name: impl Into<String>, config: &JwtValidatorConfig) -> Result<Self> {
        let resolver = build_resolver(&config.keys).await?;
        let mut validator = Self::new(name, resolver, ClaimRules::from_config(&config.custom));
        validator.default_key_id.clone_from(&config.default_key_id);
        Ok(validator)
    }

    /// Claim rules applied after signature verification
    #[must_use]
    pub fn rules(&self) -> &ClaimRules {
        &self.rules
    }
}

impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenValidator")
            .field("name", &self.name)
            .field("rules", &self.rules)
            .field("default_key_id", &self.default_key_id)
            .finish_non_exhaustive()
    }
}

/// Map a `jsonwebtoken` failure onto the rejection taxonomy.
fn rejection(err: &JwtError) -> ValidationError {
    match err.kind() {
        ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
            ValidationError::MalformedCredential(err.to_string())
        }
        ErrorKind::ExpiredSignature => ValidationError::claim(ClaimRule::Expiry, "token expired"),
        ErrorKind::ImmatureSignature => ValidationError::claim(ClaimRule::NotBefore, "token not yet valid"),
        ErrorKind::InvalidIssuer => ValidationError::claim(ClaimRule::Issuer, "issuer not allowed"),
        ErrorKind::InvalidAudience => ValidationError::claim(ClaimRule::Audience, "no accepted audience"),
        ErrorKind::MissingRequiredClaim(name) => {
            let rule = match name.as_str() {
                "exp" => ClaimRule::Expiry,
                "nbf" => ClaimRule::NotBefore,
                "iss" => ClaimRule::Issuer,
                _ => ClaimRule::Required,
            };
            ValidationError::claim(rule, format!("missing claim {name}"))
        }
        // Signature mismatch, algorithm not allowed for the key, key errors
        _ => ValidationError::SignatureInvalid,
    }
}

#[async_trait]
impl Validator for TokenValidator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ValidatorKind {
        ValidatorKind::SignedToken
    }

    async fn validate(&self, credential: &Credential) -> std::result::Result<Principal, ValidationError> {
        if credential.scheme() == Some(Scheme::Basic) {
            return Err(ValidationError::MalformedCredential(
                "expected a bearer token".to_string(),
            ));
        }

        let token = credential.value();
        let header = decode_header(token).map_err(|e| ValidationError::MalformedCredential(e.to_string()))?;

        let key_id = header
            .kid
            .clone()
            .or_else(|| self.default_key_id.clone())
            .ok_or_else(|| ValidationError::MalformedCredential("header has no kid".to_string()))?;

        let key = self.resolver.resolve(&key_id).await?;

        if !key.accepts(header.alg) {
            debug!(validator = %self.name, kid = %key_id, alg = ?header.alg, "Algorithm not allowed for key");
            return Err(ValidationError::SignatureInvalid);
        }

        let validation = self.rules.validation(key.algorithms());
        let claims = decode::<Map<String, Value>>(token, key.decoding_key(), &validation)
            .map_err(|e| rejection(&e))?
            .claims;
        self.rules.check(&claims)?;

        Ok(Principal::from_claims(self.name.clone(), claims))
    }
}

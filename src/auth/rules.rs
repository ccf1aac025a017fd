//! Claim rules applied to a token.
//!
//! Registered time and issuer claims are enforced by `jsonwebtoken` through
//! the [`Validation`] built here. Audience, configured values and predicates
//! are checked afterwards on the decoded claims.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use jsonwebtoken::{Algorithm, Validation};
use serde_json::{Map, Value};

use super::error::ValidationError;
use crate::config::ClaimRulesConfig;

/// Extra check over verified claims. Returns the rejection reason on failure.
pub type ClaimPredicate = Arc<dyn Fn(&Map<String, Value>) -> Result<(), String> + Send + Sync>;

/// Claims `jsonwebtoken` can require by name
const REGISTERED_CLAIMS: [&str; 5] = ["exp", "nbf", "iss", "sub", "aud"];

/// Names the rule that rejected a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimRule {
    /// A required claim is missing
    Required,
    /// `iss` missing or not in the allow-list
    Issuer,
    /// `aud` does not intersect the allow-list
    Audience,
    /// `exp` missing, malformed or in the past
    Expiry,
    /// `nbf` malformed or in the future
    NotBefore,
    /// A configured claim value does not match
    Value,
    /// A named programmatic predicate failed
    Predicate(String),
}

impl fmt::Display for ClaimRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => f.write_str("required"),
            Self::Issuer => f.write_str("issuer"),
            Self::Audience => f.write_str("audience"),
            Self::Expiry => f.write_str("expiry"),
            Self::NotBefore => f.write_str("not_before"),
            Self::Value => f.write_str("value"),
            Self::Predicate(name) => write!(f, "predicate:{name}"),
        }
    }
}

/// Claim rules for one token validator.
#[derive(Clone)]
pub struct ClaimRules {
    validation: Validation,
    audiences: Vec<String>,
    required_claims: Vec<String>,
    claims: BTreeMap<String, Value>,
    predicates: Vec<(String, ClaimPredicate)>,
}

impl Default for ClaimRules {
    fn default() -> Self {
        Self::from_config(&ClaimRulesConfig::default())
    }
}

impl ClaimRules {
    /// Build from configuration.
    #[must_use]
    pub fn from_config(config: &ClaimRulesConfig) -> Self {
        let mut validation = Validation::default();
        validation.leeway = config.leeway;
        validation.validate_exp = true;
        validation.validate_nbf = config.validate_nbf;
        // `aud` may be a string or an array; matched in `check`
        validation.validate_aud = false;

        let mut required: Vec<&str> = config
            .required_claims
            .iter()
            .map(String::as_str)
            .filter(|name| REGISTERED_CLAIMS.contains(name))
            .collect();
        if config.require_exp {
            required.push("exp");
        }
        if !config.issuers.is_empty() {
            validation.set_issuer(config.issuers.as_slice());
            required.push("iss");
        }
        validation.set_required_spec_claims(required.as_slice());

        Self {
            validation,
            audiences: config.audiences.clone(),
            required_claims: config.required_claims.clone(),
            claims: config.claims.clone(),
            predicates: Vec::new(),
        }
    }

    /// Add a predicate evaluated after every configured rule.
    #[must_use]
    pub fn with_predicate<F>(mut self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> Result<(), String> + Send + Sync + 'static,
    {
        self.predicates.push((name.into(), Arc::new(predicate)));
        self
    }

    /// `jsonwebtoken` validation for a key that verifies `algorithms`.
    #[must_use]
    pub fn validation(&self, algorithms: Vec<Algorithm>) -> Validation {
        let mut validation = self.validation.clone();
        validation.algorithms = algorithms;
        validation
    }

    /// Rules `jsonwebtoken` does not cover, applied to decoded claims.
    pub fn check(&self, claims: &Map<String, Value>) -> Result<(), ValidationError> {
        numeric_date(claims, "exp", ClaimRule::Expiry)?;
        numeric_date(claims, "nbf", ClaimRule::NotBefore)?;

        for name in &self.required_claims {
            if !claims.contains_key(name) {
                return Err(ValidationError::claim(
                    ClaimRule::Required,
                    format!("missing claim {name}"),
                ));
            }
        }

        if !self.audiences.is_empty() {
            check_audience(claims.get("aud"), &self.audiences)?;
        }

        for (name, expected) in &self.claims {
            if claims.get(name) != Some(expected) {
                return Err(ValidationError::claim(
                    ClaimRule::Value,
                    format!("claim {name} does not match"),
                ));
            }
        }

        for (name, predicate) in &self.predicates {
            predicate(claims)
                .map_err(|reason| ValidationError::claim(ClaimRule::Predicate(name.clone()), reason))?;
        }

        Ok(())
    }
}

impl fmt::Debug for ClaimRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimRules")
            .field("issuers", &self.validation.iss)
            .field("audiences", &self.audiences)
            .field("leeway", &self.validation.leeway)
            .field("validate_nbf", &self.validation.validate_nbf)
            .field("required_claims", &self.required_claims)
            .field("claims", &self.claims)
            .field(
                "predicates",
                &self.predicates.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

/// A present `exp` or `nbf` must be a non-negative integer. `jsonwebtoken`
/// ignores values it cannot parse.
fn numeric_date(claims: &Map<String, Value>, name: &str, rule: ClaimRule) -> Result<(), ValidationError> {
    match claims.get(name) {
        Some(value) if !value.is_u64() => Err(ValidationError::claim(
            rule,
            format!("{name} is not a NumericDate"),
        )),
        _ => Ok(()),
    }
}

/// `aud` may be a single string or an array of strings.
fn check_audience(aud: Option<&Value>, expected: &[String]) -> Result<(), ValidationError> {
    let matches = match aud {
        Some(Value::String(s)) => expected.iter().any(|e| e == s),
        Some(Value::Array(arr)) => arr
            .iter()
            .any(|v| v.as_str().is_some_and(|s| expected.iter().any(|e| e == s))),
        _ => false,
    };

    if matches {
        Ok(())
    } else {
        Err(ValidationError::claim(
            ClaimRule::Audience,
            "no accepted audience",
        ))
    }
}

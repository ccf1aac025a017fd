//! Ordered composite validator.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use super::error::{AllFailed, ValidatorFailure};
use super::secret::StaticSecretValidator;
use super::token::TokenValidator;
use super::{Credential, Principal, Validator};
use crate::Result;
use crate::config::AuthConfig;

/// Validators tried in order; the first success wins.
///
/// Immutable after construction and shared behind `Arc` by every request.
#[derive(Clone, Default)]
pub struct ValidatorChain {
    validators: Vec<Arc<dyn Validator>>,
}

impl ValidatorChain {
    /// Chain over `validators`, evaluated in the given order.
    #[must_use]
    pub fn new(validators: Vec<Arc<dyn Validator>>) -> Self {
        Self { validators }
    }

    /// A chain that rejects everything.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build every configured validator: signed-token validators first, then
    /// shared secrets, each in list order.
    ///
    /// Fails as a whole if any single validator cannot be built.
    pub async fn from_config(config: &AuthConfig) -> Result<Self> {
        let mut validators: Vec<Arc<dyn Validator>> = Vec::new();

        for (i, jwt) in config.jwt_validators.iter().enumerate() {
            let name = jwt.name.clone().unwrap_or_else(|| format!("jwt[{i}]"));
            let validator = TokenValidator::from_config(name, jwt).await?;
            validators.push(Arc::new(validator));
        }

        for (i, secret) in config.resolve_secrets()?.iter().enumerate() {
            validators.push(Arc::new(StaticSecretValidator::new(format!("secret[{i}]"), secret)?));
        }

        let chain = Self::new(validators);
        info!(validators = ?chain.names(), "Validator chain built");
        Ok(chain)
    }

    /// Number of validators
    #[must_use]
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Whether the chain is empty (and so rejects everything)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Validator labels in evaluation order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.validators.iter().map(|v| v.name()).collect()
    }

    /// Run `credential` through the chain.
    ///
    /// # Errors
    ///
    /// Returns [`AllFailed`] carrying every validator's reason, in order,
    /// when none accepts. An empty chain fails with no reasons.
    pub async fn validate(&self, credential: &Credential) -> std::result::Result<Principal, AllFailed> {
        let mut failures = Vec::new();

        for validator in &self.validators {
            match validator.validate(credential).await {
                Ok(principal) => {
                    debug!(validator = validator.name(), kind = %validator.kind(), "Credential accepted");
                    return Ok(principal);
                }
                Err(error) => failures.push(ValidatorFailure {
                    validator: validator.name().to_string(),
                    error,
                }),
            }
        }

        Err(AllFailed { failures })
    }
}

impl fmt::Debug for ValidatorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorChain")
            .field("validators", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ValidationError;

    fn secret(name: &str, value: &str) -> Arc<dyn Validator> {
        Arc::new(StaticSecretValidator::new(name, value).unwrap())
    }

    #[tokio::test]
    async fn empty_chain_rejects_everything() {
        let chain = ValidatorChain::empty();
        assert!(chain.is_empty());
        for raw in ["", "anything", "Bearer a.b.c"] {
            let err = chain.validate(&Credential::from_header_value(raw)).await.unwrap_err();
            assert!(err.failures.is_empty());
        }
    }

    #[tokio::test]
    async fn first_success_short_circuits() {
        let chain = ValidatorChain::new(vec![
            secret("first", "alpha"),
            secret("second", "alpha"),
        ]);
        let principal = chain.validate(&Credential::new("alpha")).await.unwrap();
        assert_eq!(principal.validator, "first");
    }

    #[tokio::test]
    async fn failures_are_reported_in_order() {
        let chain = ValidatorChain::new(vec![secret("a", "one"), secret("b", "two")]);
        let err = chain.validate(&Credential::new("three")).await.unwrap_err();
        let order: Vec<_> = err.failures.iter().map(|f| f.validator.as_str()).collect();
        assert_eq!(order, vec!["a", "b"]);
        assert_eq!(err.error_for("b"), Some(&ValidationError::NoMatch));
    }

    #[tokio::test]
    async fn from_config_orders_tokens_before_secrets() {
        let config = crate::config::Config::from_yaml(
            r#"
auth:
  authHeader: ["s1", "s2"]
  jwtValidators:
    - keys:
        keys:
          - key_id: k1
            algorithm: HS256
            secret: "hs"
    - name: partner
      keys:
        keys:
          - key_id: k2
            algorithm: HS512
            secret: "hs2"
"#,
        )
        .unwrap();

        let chain = ValidatorChain::from_config(&config.auth).await.unwrap();
        assert_eq!(chain.names(), vec!["jwt[0]", "partner", "secret[0]", "secret[1]"]);
    }

    #[tokio::test]
    async fn one_bad_descriptor_fails_the_whole_chain() {
        let config = crate::config::Config::from_yaml(
            r#"
auth:
  authHeader: ["s1"]
  jwtValidators:
    - keys:
        strategy: uri
"#,
        )
        .unwrap();
        assert!(ValidatorChain::from_config(&config.auth).await.is_err());
    }
}

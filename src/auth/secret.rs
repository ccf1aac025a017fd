//! Static shared-secret validator.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::error::ValidationError;
use super::{Credential, Principal, Validator, ValidatorKind};
use crate::{Error, Result};

/// Matches the credential against one configured secret.
///
/// Both sides are hashed before a constant-time compare, so neither the
/// position of the first differing byte nor the secret's length shows up in
/// timing. Only the digest is kept in memory.
pub struct StaticSecretValidator {
    name: String,
    digest: Vec<u8>,
}

impl StaticSecretValidator {
    /// Create a validator for `secret`. Empty secrets are refused.
    pub fn new(name: impl Into<String>, secret: &str) -> Result<Self> {
        let name = name.into();
        if secret.is_empty() {
            return Err(Error::config(format!("{name}: shared secret is empty")));
        }
        Ok(Self {
            name,
            digest: Sha256::digest(secret.as_bytes()).to_vec(),
        })
    }
}

impl std::fmt::Debug for StaticSecretValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticSecretValidator")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Validator for StaticSecretValidator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ValidatorKind {
        ValidatorKind::SharedSecret
    }

    async fn validate(&self, credential: &Credential) -> std::result::Result<Principal, ValidationError> {
        let candidate = Sha256::digest(credential.value().as_bytes());
        if bool::from(self.digest[..].ct_eq(&candidate[..])) {
            Ok(Principal::shared_secret(self.name.clone()))
        } else {
            Err(ValidationError::NoMatch)
        }
    }
}

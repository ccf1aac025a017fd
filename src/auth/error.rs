//! Validation error taxonomy.
//!
//! Everything here stays inside the process: the middleware logs it and
//! answers the caller with one fixed status.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use super::rules::ClaimRule;

/// Key resolution failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// No key is published under this id
    #[error("unknown key id: {0}")]
    NotFound(String),

    /// Upstream fetch failed (network, HTTP status, body)
    #[error("key fetch failed: {0}")]
    Fetch(String),

    /// Upstream fetch exceeded its deadline
    #[error("key fetch timed out after {0:?}")]
    Timeout(Duration),

    /// Key material could not be parsed
    #[error("malformed key material: {0}")]
    Malformed(String),
}

/// Why one validator rejected a credential
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Credential is not a structure this validator understands
    #[error("malformed credential: {0}")]
    MalformedCredential(String),

    /// Verification key could not be obtained
    #[error("key resolution failed: {0}")]
    KeyResolutionFailed(#[from] KeyError),

    /// Signature does not verify under the resolved key
    #[error("signature invalid")]
    SignatureInvalid,

    /// Signature verified but a claim rule failed
    #[error("claim rejected by {rule} rule: {reason}")]
    ClaimRejected {
        /// The failing rule
        rule: ClaimRule,
        /// Human-readable detail for operators
        reason: String,
    },

    /// Shared secret did not match
    #[error("credential does not match")]
    NoMatch,
}

impl ValidationError {
    /// Short stable tag, used as a log field and metric label.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedCredential(_) => "malformed_credential",
            Self::KeyResolutionFailed(_) => "key_resolution_failed",
            Self::SignatureInvalid => "signature_invalid",
            Self::ClaimRejected { .. } => "claim_rejected",
            Self::NoMatch => "no_match",
        }
    }

    pub(crate) fn claim(rule: ClaimRule, reason: impl Into<String>) -> Self {
        Self::ClaimRejected {
            rule,
            reason: reason.into(),
        }
    }
}

/// One validator's verdict inside an [`AllFailed`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorFailure {
    /// Validator label
    pub validator: String,
    /// Its error
    pub error: ValidationError,
}

/// Chain-level rejection: every validator failed (or there were none).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AllFailed {
    /// Per-validator failures in evaluation order
    pub failures: Vec<ValidatorFailure>,
}

impl AllFailed {
    /// Error reported by the validator with this label, if it ran.
    #[must_use]
    pub fn error_for(&self, validator: &str) -> Option<&ValidationError> {
        self.failures
            .iter()
            .find(|f| f.validator == validator)
            .map(|f| &f.error)
    }
}

impl fmt::Display for AllFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return f.write_str("no validators configured");
        }
        write!(f, "all {} validators rejected the credential", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{} ({})", failure.validator, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for AllFailed {}

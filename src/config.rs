//! Configuration management

use std::{collections::BTreeMap, env, path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// Webhook registration configuration
    pub webhooks: WebhookConfig,
    /// Metrics exporter configuration
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (NOTIFY_GATEWAY_ prefix)
        figment = figment.merge(Env::prefixed("NOTIFY_GATEWAY_").split("__"));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Parse configuration from a YAML string (no environment merge).
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Figment::new()
            .merge(Yaml::string(yaml))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6000,
            request_timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024,
        }
    }
}

/// Authentication configuration.
///
/// `jwt_validators` and `auth_header` together describe the validator chain.
/// Signed-token validators are evaluated first, then shared secrets, each in
/// list order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Header carrying the credential
    pub header_name: String,
    /// Status returned for every rejected request
    pub forbidden_status: u16,
    /// Signed-token validators
    #[serde(alias = "jwtValidators")]
    pub jwt_validators: Vec<JwtValidatorConfig>,
    /// Shared secrets matched exactly. Supports `env:VAR_NAME`.
    #[serde(alias = "authHeader")]
    pub auth_header: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            header_name: "Authorization".to_string(),
            forbidden_status: 403,
            jwt_validators: Vec::new(),
            auth_header: Vec::new(),
        }
    }
}

impl AuthConfig {
    /// Resolve shared secrets, expanding `env:VAR_NAME` references.
    ///
    /// A reference to an unset variable is a configuration error rather than
    /// a literal fallback, so a typo can never turn `env:...` into a valid
    /// secret.
    pub fn resolve_secrets(&self) -> Result<Vec<String>> {
        self.auth_header
            .iter()
            .enumerate()
            .map(|(i, value)| {
                let secret = resolve_value(value)?;
                if secret.is_empty() {
                    return Err(Error::Config(format!("auth_header[{i}] is empty")));
                }
                Ok(secret)
            })
            .collect()
    }
}

/// Resolve a literal or `env:VAR_NAME` value.
pub fn resolve_value(value: &str) -> Result<String> {
    match value.strip_prefix("env:") {
        Some(var_name) => env::var(var_name)
            .map_err(|_| Error::Config(format!("environment variable {var_name} is not set"))),
        None => Ok(value.to_string()),
    }
}

/// One signed-token validator
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct JwtValidatorConfig {
    /// Label used in logs and on the principal (defaults to `jwt[<index>]`)
    pub name: Option<String>,
    /// Where verification keys come from
    pub keys: KeyDescriptor,
    /// Claim rules applied after the signature verifies
    pub custom: ClaimRulesConfig,
    /// Key id used when a token header carries no `kid`.
    /// Unset means such tokens are rejected as malformed.
    pub default_key_id: Option<String>,
}

/// How a key resolver obtains key material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// Keys listed inline in the configuration
    #[default]
    Static,
    /// Fetched from `uri` on every resolution
    Uri,
    /// Fetched from `uri` and cached for `ttl`
    Cached,
}

/// Body format served by a key URI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyFormat {
    /// RFC 7517 JSON Web Key Set
    #[default]
    Jwks,
    /// A single PEM-encoded public key
    Pem,
}

/// Declarative form of a key resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyDescriptor {
    /// Resolution strategy
    pub strategy: KeyStrategy,
    /// Key source for `uri`/`cached`. May contain a `{keyId}` placeholder.
    pub uri: Option<String>,
    /// Body format of `uri`
    pub format: KeyFormat,
    /// Key id served by a plain (non-templated) PEM URI
    pub key_id: Option<String>,
    /// Algorithm pinned for keys fetched as PEM
    pub algorithm: Option<Algorithm>,
    /// Inline keys for the `static` strategy
    pub keys: Vec<StaticKeyConfig>,
    /// Upper bound for one key fetch
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// How long fetched keys stay fresh (`cached` only)
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Minimum gap between refreshes triggered by unknown key ids (`cached` only)
    #[serde(with = "humantime_serde")]
    pub min_refresh_interval: Duration,
    /// Fetch once during startup; a failure aborts startup
    pub eager: bool,
}

impl Default for KeyDescriptor {
    fn default() -> Self {
        Self {
            strategy: KeyStrategy::Static,
            uri: None,
            format: KeyFormat::Jwks,
            key_id: None,
            algorithm: None,
            keys: Vec::new(),
            timeout: Duration::from_secs(5),
            ttl: Duration::from_secs(300),
            min_refresh_interval: Duration::from_secs(30),
            eager: false,
        }
    }
}

/// An inline verification key. Exactly one of `pem`, `pem_file`, `secret`
/// must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticKeyConfig {
    /// Key id matched against the token's `kid`
    pub key_id: String,
    /// Algorithm this key verifies
    pub algorithm: Algorithm,
    /// PEM-encoded public key
    #[serde(default)]
    pub pem: Option<String>,
    /// Path to a PEM-encoded public key
    #[serde(default)]
    pub pem_file: Option<PathBuf>,
    /// HMAC secret (supports `env:VAR_NAME`)
    #[serde(default)]
    pub secret: Option<String>,
}

/// Claim rules applied by a signed-token validator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimRulesConfig {
    /// Accepted `iss` values (empty = any)
    pub issuers: Vec<String>,
    /// Accepted `aud` values (empty = not checked)
    pub audiences: Vec<String>,
    /// Clock skew tolerance in seconds for `exp` and `nbf`
    pub leeway: u64,
    /// Reject tokens without `exp`
    pub require_exp: bool,
    /// Check `nbf` when present
    pub validate_nbf: bool,
    /// Claims that must be present
    pub required_claims: Vec<String>,
    /// Claims that must equal the given value
    pub claims: BTreeMap<String, serde_json::Value>,
}

impl Default for ClaimRulesConfig {
    fn default() -> Self {
        Self {
            issuers: Vec::new(),
            audiences: Vec::new(),
            leeway: 60,
            require_exp: true,
            validate_nbf: true,
            required_claims: Vec::new(),
            claims: BTreeMap::new(),
        }
    }
}

/// Webhook registration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Registration lifetime when the request does not carry one
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
    /// Upper bound for a requested lifetime
    #[serde(with = "humantime_serde")]
    pub max_ttl: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            max_ttl: Duration::from_secs(3600),
        }
    }
}

/// Metrics exporter configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MetricsConfig {
    /// Address for the Prometheus scrape endpoint (requires the `metrics` feature)
    pub listen: Option<String>,
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    /// Parse "30s", "5m", "100ms", or a bare number of seconds.
    pub fn parse(s: &str) -> Result<Duration, std::num::ParseIntError> {
        let s = s.trim();
        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>().map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>().map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>().map(|m| Duration::from_secs(m * 60))
        } else if let Some(hours) = s.strip_suffix('h') {
            hours.parse::<u64>().map(|h| Duration::from_secs(h * 3600))
        } else {
            s.parse::<u64>().map(Duration::from_secs)
        }
    }
}

//! Verification key resolution.
//!
//! # Strategies
//!
//! - `static`: keys parsed once from configuration.
//! - `uri`: fetched from a JWKS or PEM endpoint on every resolution.
//! - `cached`: as `uri`, but kept in a copy-on-write snapshot for `ttl`.
//!
//! A `{keyId}` placeholder in the URI is replaced by the URL-encoded key id,
//! so one endpoint can serve one key per path. Unknown key ids trigger a
//! refresh at most once per `min_refresh_interval` for the same URL.
//!
//! # Concurrency
//!
//! Resolutions read an `Arc` snapshot and release the lock immediately. A
//! refresh fetches without holding any lock and then swaps in a new snapshot,
//! so a slow upstream never blocks lookups served from the cache.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{
    Algorithm, DecodingKey,
    jwk::{AlgorithmParameters, Jwk, JwkSet, KeyAlgorithm, PublicKeyUse},
};
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use super::error::KeyError;
use crate::config::{KeyDescriptor, KeyFormat, KeyStrategy, StaticKeyConfig, resolve_value};
use crate::{Error, Result};

/// Placeholder substituted with the requested key id
pub const KEY_ID_PLACEHOLDER: &str = "{keyId}";

/// Key type, used to reject algorithm confusion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    /// HS256/384/512
    Hmac,
    /// RS* and PS*
    Rsa,
    /// ES256/384
    Ec,
    /// EdDSA
    Ed,
}

impl KeyFamily {
    /// Family an algorithm belongs to.
    #[must_use]
    pub fn of(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Self::Hmac,
            Algorithm::ES256 | Algorithm::ES384 => Self::Ec,
            Algorithm::EdDSA => Self::Ed,
            _ => Self::Rsa,
        }
    }

    /// Every algorithm in the family.
    #[must_use]
    pub fn algorithms(self) -> &'static [Algorithm] {
        match self {
            Self::Hmac => &[Algorithm::HS256, Algorithm::HS384, Algorithm::HS512],
            Self::Rsa => &[
                Algorithm::RS256,
                Algorithm::RS384,
                Algorithm::RS512,
                Algorithm::PS256,
                Algorithm::PS384,
                Algorithm::PS512,
            ],
            Self::Ec => &[Algorithm::ES256, Algorithm::ES384],
            Self::Ed => &[Algorithm::EdDSA],
        }
    }
}

/// Key material bound to the identifier it was published under.
pub struct VerificationKey {
    key_id: String,
    algorithm: Option<Algorithm>,
    family: KeyFamily,
    key: DecodingKey,
}

impl VerificationKey {
    /// Parse a PEM-encoded public key for `algorithm`.
    pub fn from_pem(
        key_id: impl Into<String>,
        algorithm: Algorithm,
        pem: &[u8],
    ) -> std::result::Result<Self, KeyError> {
        let family = KeyFamily::of(algorithm);
        let key = match family {
            KeyFamily::Rsa => DecodingKey::from_rsa_pem(pem),
            KeyFamily::Ec => DecodingKey::from_ec_pem(pem),
            KeyFamily::Ed => DecodingKey::from_ed_pem(pem),
            KeyFamily::Hmac => {
                return Err(KeyError::Malformed(format!(
                    "{algorithm:?} keys are shared secrets, not PEM"
                )));
            }
        }
        .map_err(|e| KeyError::Malformed(e.to_string()))?;

        Ok(Self {
            key_id: key_id.into(),
            algorithm: Some(algorithm),
            family,
            key,
        })
    }

    /// An HMAC shared-secret key.
    pub fn from_secret(
        key_id: impl Into<String>,
        algorithm: Algorithm,
        secret: &[u8],
    ) -> std::result::Result<Self, KeyError> {
        if KeyFamily::of(algorithm) != KeyFamily::Hmac {
            return Err(KeyError::Malformed(format!(
                "{algorithm:?} cannot use a shared secret"
            )));
        }
        Ok(Self {
            key_id: key_id.into(),
            algorithm: Some(algorithm),
            family: KeyFamily::Hmac,
            key: DecodingKey::from_secret(secret),
        })
    }

    /// Convert one JWK. Symmetric keys are refused from remote sets.
    pub fn from_jwk(jwk: &Jwk) -> std::result::Result<Self, KeyError> {
        let key_id = jwk
            .common
            .key_id
            .clone()
            .ok_or_else(|| KeyError::Malformed("JWK without kid".to_string()))?;

        let family = match &jwk.algorithm {
            AlgorithmParameters::RSA(_) => KeyFamily::Rsa,
            AlgorithmParameters::EllipticCurve(_) => KeyFamily::Ec,
            AlgorithmParameters::OctetKeyPair(_) => KeyFamily::Ed,
            _ => {
                return Err(KeyError::Malformed(format!(
                    "JWK {key_id}: unsupported key type"
                )));
            }
        };

        let algorithm = match &jwk.common.key_algorithm {
            Some(declared) => {
                let alg = signing_algorithm(declared).ok_or_else(|| {
                    KeyError::Malformed(format!("JWK {key_id}: {declared:?} is not a signing algorithm"))
                })?;
                if KeyFamily::of(alg) != family {
                    return Err(KeyError::Malformed(format!(
                        "JWK {key_id}: {alg:?} does not match key type"
                    )));
                }
                Some(alg)
            }
            None => None,
        };

        let key = DecodingKey::from_jwk(jwk)
            .map_err(|e| KeyError::Malformed(format!("JWK {key_id}: {e}")))?;

        Ok(Self {
            key_id,
            algorithm,
            family,
            key,
        })
    }

    /// Identifier the key was published under
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Pinned algorithm, if the source declared one
    #[must_use]
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    /// Key family
    #[must_use]
    pub fn family(&self) -> KeyFamily {
        self.family
    }

    /// Key for signature verification
    #[must_use]
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }

    /// Algorithms this key may verify: the pinned one, else its whole family.
    #[must_use]
    pub fn algorithms(&self) -> Vec<Algorithm> {
        match self.algorithm {
            Some(pinned) => vec![pinned],
            None => self.family.algorithms().to_vec(),
        }
    }

    /// Whether a token signed with `algorithm` may be verified by this key.
    #[must_use]
    pub fn accepts(&self, algorithm: Algorithm) -> bool {
        match self.algorithm {
            Some(pinned) => pinned == algorithm,
            None => KeyFamily::of(algorithm) == self.family,
        }
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .field("family", &self.family)
            .finish_non_exhaustive()
    }
}

fn signing_algorithm(declared: &KeyAlgorithm) -> Option<Algorithm> {
    match declared {
        KeyAlgorithm::HS256 => Some(Algorithm::HS256),
        KeyAlgorithm::HS384 => Some(Algorithm::HS384),
        KeyAlgorithm::HS512 => Some(Algorithm::HS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    }
}

/// Maps a key id to verification key material.
///
/// Implementations never return a key published under a different id.
#[async_trait]
pub trait KeyResolver: Send + Sync {
    /// Resolve `key_id`.
    async fn resolve(&self, key_id: &str) -> std::result::Result<Arc<VerificationKey>, KeyError>;
}

// ============================================================================
// Static
// ============================================================================

/// Fixed key set parsed at startup
#[derive(Debug, Default)]
pub struct StaticKeyResolver {
    keys: HashMap<String, Arc<VerificationKey>>,
}

impl StaticKeyResolver {
    /// Build from parsed keys. Duplicate ids are a configuration error.
    pub fn new(keys: impl IntoIterator<Item = VerificationKey>) -> Result<Self> {
        let mut map = HashMap::new();
        for key in keys {
            let id = key.key_id.clone();
            if map.insert(id.clone(), Arc::new(key)).is_some() {
                return Err(Error::config(format!("duplicate static key id {id:?}")));
            }
        }
        Ok(Self { keys: map })
    }

    /// Parse inline key entries.
    pub fn from_config(entries: &[StaticKeyConfig]) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::config("static key strategy requires at least one key"));
        }
        let keys = entries
            .iter()
            .map(parse_static_key)
            .collect::<Result<Vec<_>>>()?;
        Self::new(keys)
    }

    /// Number of keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait]
impl KeyResolver for StaticKeyResolver {
    async fn resolve(&self, key_id: &str) -> std::result::Result<Arc<VerificationKey>, KeyError> {
        self.keys
            .get(key_id)
            .cloned()
            .ok_or_else(|| KeyError::NotFound(key_id.to_string()))
    }
}

fn parse_static_key(entry: &StaticKeyConfig) -> Result<VerificationKey> {
    let id = &entry.key_id;
    let invalid = |e: KeyError| Error::config(format!("static key {id:?}: {e}"));

    match (&entry.pem, &entry.pem_file, &entry.secret) {
        (Some(pem), None, None) => {
            VerificationKey::from_pem(id.clone(), entry.algorithm, pem.as_bytes()).map_err(invalid)
        }
        (None, Some(path), None) => {
            let pem = std::fs::read(path).map_err(|e| {
                Error::config(format!("static key {id:?}: cannot read {}: {e}", path.display()))
            })?;
            VerificationKey::from_pem(id.clone(), entry.algorithm, &pem).map_err(invalid)
        }
        (None, None, Some(secret)) => {
            let secret = resolve_value(secret)?;
            if secret.is_empty() {
                return Err(Error::config(format!("static key {id:?}: empty secret")));
            }
            VerificationKey::from_secret(id.clone(), entry.algorithm, secret.as_bytes())
                .map_err(invalid)
        }
        _ => Err(Error::config(format!(
            "static key {id:?}: set exactly one of pem, pem_file, secret"
        ))),
    }
}

// ============================================================================
// Remote (uri / cached)
// ============================================================================

/// Cache policy for the `cached` strategy
#[derive(Debug, Clone, Copy)]
struct CachePolicy {
    ttl: Duration,
    min_refresh_interval: Duration,
}

#[derive(Clone)]
struct CachedKey {
    key: Arc<VerificationKey>,
    fetched_at: Instant,
}

/// Immutable view swapped in after each fetch attempt
#[derive(Clone, Default)]
struct KeySnapshot {
    keys: HashMap<String, CachedKey>,
    /// Last fetch attempt per URL, successful or not, for unknown-id throttling
    refreshed: HashMap<String, Instant>,
}

impl KeySnapshot {
    fn mark_refreshed(&mut self, url: &str, now: Instant, throttle: Duration) {
        self.refreshed.retain(|_, at| now.duration_since(*at) < throttle);
        self.refreshed.insert(url.to_string(), now);
    }
}

/// Fetches keys from a JWKS or PEM endpoint, optionally caching them.
pub struct RemoteKeyResolver {
    template: String,
    templated: bool,
    format: KeyFormat,
    key_id: Option<String>,
    algorithm: Option<Algorithm>,
    timeout: Duration,
    cache: Option<CachePolicy>,
    client: reqwest::Client,
    snapshot: RwLock<Arc<KeySnapshot>>,
}

impl RemoteKeyResolver {
    /// Build from a `uri` or `cached` descriptor. Performs no I/O.
    pub fn new(descriptor: &KeyDescriptor) -> Result<Self> {
        let template = descriptor
            .uri
            .clone()
            .ok_or_else(|| Error::config(format!("{:?} key strategy requires uri", descriptor.strategy)))?;
        let templated = template.contains(KEY_ID_PLACEHOLDER);

        let probe = Url::parse(&template.replace(KEY_ID_PLACEHOLDER, "probe"))
            .map_err(|e| Error::config(format!("invalid key uri {template:?}: {e}")))?;
        match probe.scheme() {
            "https" => {}
            "http" => warn!(uri = %template, "Key source uses plain http"),
            other => {
                return Err(Error::config(format!(
                    "unsupported key uri scheme {other:?} in {template:?}"
                )));
            }
        }

        if descriptor.format == KeyFormat::Pem {
            if descriptor.algorithm.is_none() {
                return Err(Error::config("pem key format requires algorithm"));
            }
            if !templated && descriptor.key_id.is_none() {
                return Err(Error::config(format!(
                    "pem key uri without {KEY_ID_PLACEHOLDER} requires key_id"
                )));
            }
        }

        let cache = (descriptor.strategy == KeyStrategy::Cached).then_some(CachePolicy {
            ttl: descriptor.ttl,
            min_refresh_interval: descriptor.min_refresh_interval,
        });

        let client = reqwest::Client::builder()
            .timeout(descriptor.timeout)
            .build()?;

        Ok(Self {
            template,
            templated,
            format: descriptor.format,
            key_id: descriptor.key_id.clone(),
            algorithm: descriptor.algorithm,
            timeout: descriptor.timeout,
            cache,
            client,
            snapshot: RwLock::new(Arc::new(KeySnapshot::default())),
        })
    }

    /// Fetch once at startup. Any failure is a configuration error.
    pub async fn preload(&self) -> Result<()> {
        let key_id = match (&self.key_id, self.templated) {
            (Some(id), _) => id.clone(),
            (None, false) => String::new(),
            (None, true) => {
                return Err(Error::config(format!(
                    "eager load of {:?} requires key_id",
                    self.template
                )));
            }
        };

        let url = self.url_for(&key_id);
        let keys = self
            .fetch(&url, &key_id)
            .await
            .map_err(|e| Error::config(format!("eager key load from {url} failed: {e}")))?;
        if keys.is_empty() {
            return Err(Error::config(format!("eager key load from {url} returned no keys")));
        }
        info!(uri = %url, keys = keys.len(), "Preloaded verification keys");

        if self.cache.is_some() {
            self.install(&url, keys.into_iter().map(Arc::new).collect());
        }
        Ok(())
    }

    /// Number of cached keys (always zero for the `uri` strategy).
    #[must_use]
    pub fn cached_keys(&self) -> usize {
        self.snapshot.read().keys.len()
    }

    /// Concrete URL for `key_id`.
    #[must_use]
    pub fn url_for(&self, key_id: &str) -> String {
        if self.templated {
            let encoded: String = url::form_urlencoded::byte_serialize(key_id.as_bytes()).collect();
            self.template.replace(KEY_ID_PLACEHOLDER, &encoded)
        } else {
            self.template.clone()
        }
    }

    async fn fetch(
        &self,
        url: &str,
        key_id: &str,
    ) -> std::result::Result<Vec<VerificationKey>, KeyError> {
        debug!(uri = %url, "Fetching verification keys");

        let request = async {
            let response = self.client.get(url).send().await.map_err(|e| self.http_error(&e))?;
            let status = response.status();
            if !status.is_success() {
                return Err(KeyError::Fetch(format!("{url} returned {status}")));
            }
            response.bytes().await.map_err(|e| self.http_error(&e))
        };

        let body = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| KeyError::Timeout(self.timeout))??;

        self.parse(&body, key_id)
    }

    fn http_error(&self, e: &reqwest::Error) -> KeyError {
        if e.is_timeout() {
            KeyError::Timeout(self.timeout)
        } else {
            KeyError::Fetch(e.to_string())
        }
    }

    fn parse(&self, body: &[u8], key_id: &str) -> std::result::Result<Vec<VerificationKey>, KeyError> {
        match self.format {
            KeyFormat::Jwks => {
                let set: JwkSet = serde_json::from_slice(body)
                    .map_err(|e| KeyError::Malformed(format!("invalid JWKS: {e}")))?;
                let keys = set
                    .keys
                    .iter()
                    .filter(|jwk| !matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)))
                    .filter_map(|jwk| match VerificationKey::from_jwk(jwk) {
                        Ok(key) => Some(key),
                        Err(e) => {
                            warn!(error = %e, "Skipping unusable JWK");
                            None
                        }
                    })
                    .collect();
                Ok(keys)
            }
            KeyFormat::Pem => {
                let bound_id = if self.templated {
                    key_id.to_string()
                } else {
                    self.key_id.clone().unwrap_or_default()
                };
                let algorithm = self
                    .algorithm
                    .ok_or_else(|| KeyError::Malformed("pem source without algorithm".to_string()))?;
                Ok(vec![VerificationKey::from_pem(bound_id, algorithm, body)?])
            }
        }
    }

    /// Swap in a snapshot containing `keys` fetched from `url`.
    fn install(&self, url: &str, keys: Vec<Arc<VerificationKey>>) {
        let now = Instant::now();
        let throttle = self.cache.map_or(Duration::ZERO, |c| c.min_refresh_interval);

        let mut guard = self.snapshot.write();
        let mut next = KeySnapshot::clone(&guard);

        // A non-templated source publishes the whole set; rotated-out keys go.
        if !self.templated {
            next.keys.clear();
        }
        for key in keys {
            next.keys.insert(
                key.key_id.clone(),
                CachedKey {
                    key,
                    fetched_at: now,
                },
            );
        }
        next.mark_refreshed(url, now, throttle);

        *guard = Arc::new(next);
    }

    /// Record a failed fetch of `url`. Keys already cached are left alone.
    fn mark_failed(&self, url: &str) {
        let throttle = self.cache.map_or(Duration::ZERO, |c| c.min_refresh_interval);

        let mut guard = self.snapshot.write();
        let mut next = KeySnapshot::clone(&guard);
        next.mark_refreshed(url, Instant::now(), throttle);
        *guard = Arc::new(next);
    }

    async fn resolve_cached(
        &self,
        policy: CachePolicy,
        key_id: &str,
    ) -> std::result::Result<Arc<VerificationKey>, KeyError> {
        let url = self.url_for(key_id);
        let snapshot = Arc::clone(&*self.snapshot.read());

        match snapshot.keys.get(key_id) {
            Some(entry) if entry.fetched_at.elapsed() < policy.ttl => {
                return Ok(Arc::clone(&entry.key));
            }
            Some(_) => debug!(key_id, "Cached key is stale, refreshing"),
            None => {
                let recently = snapshot
                    .refreshed
                    .get(&url)
                    .is_some_and(|at| at.elapsed() < policy.min_refresh_interval);
                if recently {
                    debug!(key_id, "Unknown key id, refresh throttled");
                    return Err(KeyError::NotFound(key_id.to_string()));
                }
            }
        }
        drop(snapshot);

        let keys: Vec<_> = match self.fetch(&url, key_id).await {
            Ok(keys) => keys.into_iter().map(Arc::new).collect(),
            Err(e) => {
                // A failed attempt starts the throttle window as well
                self.mark_failed(&url);
                return Err(e);
            }
        };
        let found = keys.iter().find(|k| k.key_id == key_id).cloned();
        self.install(&url, keys);

        found.ok_or_else(|| KeyError::NotFound(key_id.to_string()))
    }
}

#[async_trait]
impl KeyResolver for RemoteKeyResolver {
    async fn resolve(&self, key_id: &str) -> std::result::Result<Arc<VerificationKey>, KeyError> {
        if let Some(policy) = self.cache {
            return self.resolve_cached(policy, key_id).await;
        }

        let url = self.url_for(key_id);
        self.fetch(&url, key_id)
            .await?
            .into_iter()
            .find(|k| k.key_id == key_id)
            .map(Arc::new)
            .ok_or_else(|| KeyError::NotFound(key_id.to_string()))
    }
}

impl fmt::Debug for RemoteKeyResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteKeyResolver")
            .field("uri", &self.template)
            .field("format", &self.format)
            .field("timeout", &self.timeout)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// Build the resolver a descriptor describes, performing the eager load if
/// requested.
pub async fn build_resolver(descriptor: &KeyDescriptor) -> Result<Arc<dyn KeyResolver>> {
    match descriptor.strategy {
        KeyStrategy::Static => {
            if descriptor.uri.is_some() {
                warn!("uri is ignored by the static key strategy");
            }
            Ok(Arc::new(StaticKeyResolver::from_config(&descriptor.keys)?))
        }
        KeyStrategy::Uri | KeyStrategy::Cached => {
            let resolver = RemoteKeyResolver::new(descriptor)?;
            if descriptor.eager {
                resolver.preload().await?;
            }
            Ok(Arc::new(resolver))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSA_PUBLIC: &str = include_str!("../../tests/fixtures/rsa_public.pem");
    const EC_PUBLIC: &str = include_str!("../../tests/fixtures/ec_public.pem");
    const RSA_N: &str = include_str!("../../tests/fixtures/rsa_jwk_n.txt");

    fn hmac_entry(id: &str) -> StaticKeyConfig {
        StaticKeyConfig {
            key_id: id.to_string(),
            algorithm: Algorithm::HS256,
            pem: None,
            pem_file: None,
            secret: Some("hmac-secret".to_string()),
        }
    }

    fn remote(uri: &str) -> KeyDescriptor {
        KeyDescriptor {
            strategy: KeyStrategy::Cached,
            uri: Some(uri.to_string()),
            ..KeyDescriptor::default()
        }
    }

    #[test]
    fn family_groups_algorithms() {
        assert_eq!(KeyFamily::of(Algorithm::HS512), KeyFamily::Hmac);
        assert_eq!(KeyFamily::of(Algorithm::PS256), KeyFamily::Rsa);
        assert_eq!(KeyFamily::of(Algorithm::RS384), KeyFamily::Rsa);
        assert_eq!(KeyFamily::of(Algorithm::ES384), KeyFamily::Ec);
        assert_eq!(KeyFamily::of(Algorithm::EdDSA), KeyFamily::Ed);

        for family in [KeyFamily::Hmac, KeyFamily::Rsa, KeyFamily::Ec, KeyFamily::Ed] {
            for alg in family.algorithms() {
                assert_eq!(KeyFamily::of(*alg), family, "{alg:?}");
            }
        }
    }

    #[test]
    fn pinned_key_accepts_only_its_algorithm() {
        let key = VerificationKey::from_pem("k1", Algorithm::RS256, RSA_PUBLIC.as_bytes()).unwrap();
        assert!(key.accepts(Algorithm::RS256));
        assert!(!key.accepts(Algorithm::RS512));
        assert!(!key.accepts(Algorithm::HS256));
        assert_eq!(key.algorithms(), vec![Algorithm::RS256]);
    }

    #[test]
    fn pem_must_match_algorithm_family() {
        assert!(VerificationKey::from_pem("k", Algorithm::ES256, EC_PUBLIC.as_bytes()).is_ok());
        assert!(VerificationKey::from_pem("k", Algorithm::ES256, RSA_PUBLIC.as_bytes()).is_err());
        assert!(VerificationKey::from_pem("k", Algorithm::HS256, RSA_PUBLIC.as_bytes()).is_err());
        assert!(VerificationKey::from_pem("k", Algorithm::RS256, b"not a pem").is_err());
    }

    #[test]
    fn secret_requires_hmac_algorithm() {
        assert!(VerificationKey::from_secret("k", Algorithm::HS384, b"s").is_ok());
        assert!(VerificationKey::from_secret("k", Algorithm::RS256, b"s").is_err());
    }

    #[test]
    fn jwk_without_alg_accepts_its_family() {
        let jwk: Jwk = serde_json::from_value(serde_json::json!({
            "kty": "RSA",
            "kid": "rsa-1",
            "use": "sig",
            "n": RSA_N.trim(),
            "e": "AQAB",
        }))
        .unwrap();
        let key = VerificationKey::from_jwk(&jwk).unwrap();
        assert_eq!(key.key_id(), "rsa-1");
        assert_eq!(key.algorithm(), None);
        assert!(key.accepts(Algorithm::PS256));
        assert!(!key.accepts(Algorithm::ES256));
    }

    #[test]
    fn jwk_with_mismatched_alg_is_rejected() {
        let jwk: Jwk = serde_json::from_value(serde_json::json!({
            "kty": "RSA",
            "kid": "rsa-1",
            "alg": "ES256",
            "n": RSA_N.trim(),
            "e": "AQAB",
        }))
        .unwrap();
        assert!(matches!(VerificationKey::from_jwk(&jwk), Err(KeyError::Malformed(_))));
    }

    #[test]
    fn symmetric_jwk_is_rejected() {
        let jwk: Jwk = serde_json::from_value(serde_json::json!({
            "kty": "oct",
            "kid": "hmac-1",
            "k": "c2VjcmV0",
        }))
        .unwrap();
        assert!(VerificationKey::from_jwk(&jwk).is_err());
    }

    #[test]
    fn debug_omits_key_material() {
        let key = VerificationKey::from_secret("k", Algorithm::HS256, b"topsecret").unwrap();
        let rendered = format!("{key:?}");
        assert!(rendered.contains("\"k\""));
        assert!(!rendered.contains("topsecret"));
    }

    #[tokio::test]
    async fn static_resolver_resolves_only_known_ids() {
        let resolver = StaticKeyResolver::from_config(&[hmac_entry("a"), hmac_entry("b")]).unwrap();
        assert_eq!(resolver.len(), 2);
        assert_eq!(resolver.resolve("a").await.unwrap().key_id(), "a");
        assert_eq!(
            resolver.resolve("c").await.unwrap_err(),
            KeyError::NotFound("c".to_string())
        );
    }

    #[test]
    fn static_resolver_rejects_duplicates_and_empty_sets() {
        assert!(StaticKeyResolver::from_config(&[hmac_entry("a"), hmac_entry("a")]).is_err());
        assert!(StaticKeyResolver::from_config(&[]).is_err());
    }

    #[test]
    fn static_entry_needs_exactly_one_material() {
        let mut entry = hmac_entry("a");
        entry.pem = Some(RSA_PUBLIC.to_string());
        assert!(StaticKeyResolver::from_config(&[entry]).is_err());

        let mut entry = hmac_entry("a");
        entry.secret = None;
        assert!(StaticKeyResolver::from_config(&[entry]).is_err());
    }

    #[test]
    fn static_entry_reads_pem_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.pem");
        std::fs::write(&path, RSA_PUBLIC).unwrap();

        let entry = StaticKeyConfig {
            key_id: "file".to_string(),
            algorithm: Algorithm::RS256,
            pem: None,
            pem_file: Some(path),
            secret: None,
        };
        assert_eq!(StaticKeyResolver::from_config(&[entry]).unwrap().len(), 1);
    }

    #[test]
    fn remote_requires_uri_and_supported_scheme() {
        let missing = KeyDescriptor {
            strategy: KeyStrategy::Uri,
            ..KeyDescriptor::default()
        };
        assert!(RemoteKeyResolver::new(&missing).is_err());
        assert!(RemoteKeyResolver::new(&remote("ftp://keys.example.com/jwks")).is_err());
        assert!(RemoteKeyResolver::new(&remote("not a uri")).is_err());
        assert!(RemoteKeyResolver::new(&remote("https://keys.example.com/jwks")).is_ok());
    }

    #[test]
    fn pem_format_requires_algorithm_and_binding() {
        let mut descriptor = remote("https://keys.example.com/key.pem");
        descriptor.format = KeyFormat::Pem;
        assert!(RemoteKeyResolver::new(&descriptor).is_err());

        descriptor.algorithm = Some(Algorithm::RS256);
        assert!(RemoteKeyResolver::new(&descriptor).is_err());

        descriptor.key_id = Some("current".to_string());
        assert!(RemoteKeyResolver::new(&descriptor).is_ok());

        let mut templated = remote("https://keys.example.com/keys/{keyId}");
        templated.format = KeyFormat::Pem;
        templated.algorithm = Some(Algorithm::RS256);
        assert!(RemoteKeyResolver::new(&templated).is_ok());
    }

    #[test]
    fn template_substitution_encodes_key_id() {
        let resolver = RemoteKeyResolver::new(&remote("https://keys.example.com/keys/{keyId}")).unwrap();
        assert_eq!(
            resolver.url_for("current"),
            "https://keys.example.com/keys/current"
        );
        assert_eq!(
            resolver.url_for("../admin"),
            "https://keys.example.com/keys/..%2Fadmin"
        );
    }

    #[tokio::test]
    async fn eager_templated_source_without_key_id_fails() {
        let mut descriptor = remote("https://keys.example.com/keys/{keyId}");
        descriptor.eager = true;
        let err = build_resolver(&descriptor).await.err().expect("expected build_resolver to fail");
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn eager_load_failure_is_a_configuration_error() {
        let mut descriptor = remote("http://127.0.0.1:9/jwks.json");
        descriptor.eager = true;
        descriptor.timeout = Duration::from_millis(500);
        let err = build_resolver(&descriptor).await.err().expect("expected build_resolver to fail");
        assert!(err.is_fatal());
    }
}

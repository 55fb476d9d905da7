//! Verification key resolution.
//!
//! Keys come from three places:
//!
//! - [`KeySet`]: one remote JWKS endpoint, cached and refreshed in the
//!   background, with a bounded refresh when an unknown `kid` shows up
//! - [`GivenKeys`]: static keys injected by the caller (HMAC secrets, PEM
//!   public keys)
//! - [`MultiKeySet`]: the given keys plus one [`KeySet`] per provider
//!
//! All of them implement [`KeyResolver`], which the token parser uses.
//!
//! # Concurrency
//!
//! Readers load an immutable snapshot through [`arc_swap::ArcSwap`]; a
//! refresh builds a complete new map and swaps it in. Refreshes of one key
//! set are serialized, so at most one request to the JWKS endpoint is in
//! flight per key set.

mod given;
mod key_set;
mod multi;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::jwk::{Jwk, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey};

pub use given::GivenKeys;
pub use key_set::KeySet;
pub use multi::MultiKeySet;

use crate::AuthResult;
use crate::error::AuthError;

/// A key that can verify token signatures.
#[derive(Clone)]
pub struct VerificationKey {
    /// Key id.
    pub kid: String,
    /// Decoding key.
    pub key: DecodingKey,
    /// Algorithm the key is restricted to, if it declares one.
    pub algorithm: Option<Algorithm>,
}

impl VerificationKey {
    /// Creates a key.
    #[must_use]
    pub fn new(kid: impl Into<String>, key: DecodingKey, algorithm: Option<Algorithm>) -> Self {
        Self {
            kid: kid.into(),
            key,
            algorithm,
        }
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Snapshot of keys indexed by kid.
pub type KeyMap = HashMap<String, Arc<VerificationKey>>;

/// Looks up `kid` in `keys`.
///
/// A token without a kid matches only when the map holds exactly one key.
fn lookup(keys: &KeyMap, kid: Option<&str>) -> Option<Arc<VerificationKey>> {
    match kid {
        Some(kid) => keys.get(kid).cloned(),
        None if keys.len() == 1 => keys.values().next().cloned(),
        None => None,
    }
}

fn not_found(kid: Option<&str>) -> AuthError {
    AuthError::key_not_found(kid.unwrap_or_default())
}

/// Resolves the key for a token header's `kid`.
#[async_trait]
pub trait KeyResolver: Send + Sync + fmt::Debug {
    /// Returns the key for `kid`.
    ///
    /// # Errors
    ///
    /// - `KeyNotFound` if no source knows the kid
    /// - `KeyFetch` if a required refresh failed
    async fn resolve(&self, kid: Option<&str>) -> AuthResult<Arc<VerificationKey>>;

    /// Stops background work. The default does nothing.
    async fn shutdown(&self) {}
}

/// Called with every background refresh failure.
pub type RefreshErrorHandler = Arc<dyn Fn(&AuthError) + Send + Sync>;

/// Options for remote key sets.
#[derive(Clone)]
pub struct JwksOptions {
    /// Background refresh interval (default: 5 minutes). Zero disables the
    /// background task.
    pub refresh_interval: Duration,

    /// Upper bound for an out-of-band refresh (default: 10 seconds).
    pub refresh_timeout: Duration,

    /// Minimum time between refreshes triggered by unknown kids
    /// (default: 60 seconds). Zero disables the limit.
    pub refresh_rate_limit: Duration,

    /// Refresh once when a token carries an unknown kid (default: true).
    pub refresh_unknown_kid: bool,

    /// Whether to allow HTTP (non-HTTPS) JWKS URLs.
    /// This should only be enabled for testing.
    pub allow_http: bool,

    /// HTTP client. A client with `refresh_timeout` is built when unset.
    pub client: Option<reqwest::Client>,

    /// Background refresh error handler. Logs at `warn` when unset.
    pub error_handler: Option<RefreshErrorHandler>,
}

impl Default for JwksOptions {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(300),  // 5 minutes
            refresh_timeout: Duration::from_secs(10),    // 10 seconds
            refresh_rate_limit: Duration::from_secs(60), // 1 minute
            refresh_unknown_kid: true,
            allow_http: false,
            client: None,
            error_handler: None,
        }
    }
}

impl JwksOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the background refresh interval.
    #[must_use]
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Sets the out-of-band refresh timeout.
    #[must_use]
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Sets the unknown-kid refresh rate limit.
    #[must_use]
    pub fn with_refresh_rate_limit(mut self, limit: Duration) -> Self {
        self.refresh_rate_limit = limit;
        self
    }

    /// Enables or disables the unknown-kid refresh.
    #[must_use]
    pub fn with_refresh_unknown_kid(mut self, enabled: bool) -> Self {
        self.refresh_unknown_kid = enabled;
        self
    }

    /// Allows HTTP (non-HTTPS) JWKS URLs.
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    /// Sets the HTTP client.
    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Sets the background refresh error handler.
    #[must_use]
    pub fn with_error_handler(mut self, handler: RefreshErrorHandler) -> Self {
        self.error_handler = Some(handler);
        self
    }

    fn report(&self, cert_url: &str, err: &AuthError) {
        match &self.error_handler {
            Some(handler) => handler(err),
            None => tracing::warn!(cert_url, error = %err, "Failed to refresh JWKS"),
        }
    }
}

impl fmt::Debug for JwksOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwksOptions")
            .field("refresh_interval", &self.refresh_interval)
            .field("refresh_timeout", &self.refresh_timeout)
            .field("refresh_rate_limit", &self.refresh_rate_limit)
            .field("refresh_unknown_kid", &self.refresh_unknown_kid)
            .field("allow_http", &self.allow_http)
            .field("error_handler", &self.error_handler.is_some())
            .finish_non_exhaustive()
    }
}

/// Extracts the algorithm from a JWK.
fn jwk_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    jwk.common.key_algorithm.as_ref().and_then(|alg| match alg {
        KeyAlgorithm::HS256 => Some(Algorithm::HS256),
        KeyAlgorithm::HS384 => Some(Algorithm::HS384),
        KeyAlgorithm::HS512 => Some(Algorithm::HS512),
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    })
}

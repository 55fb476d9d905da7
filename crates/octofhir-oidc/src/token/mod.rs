//! Access token verification.
//!
//! [`TokenParser`] turns a bearer token into [`Claims`]. The strategy is
//! fixed at construction:
//!
//! - **Signature**: the header `kid` is resolved through a [`KeyResolver`]
//!   and the signature is verified locally. `exp` and `nbf` are checked
//!   against an injected [`Clock`].
//! - **Introspection**: the provider's introspection endpoint decides; the
//!   payload is then decoded without verification.
//! - **Noop**: authentication is disabled; the payload is decoded when it
//!   can be, and empty claims are returned otherwise.
//!
//! Every failure is an [`AuthError`] in the `Token` category. The precise
//! cause is logged at `debug` and never includes the token itself.

pub mod introspection;
pub mod issuer;

use std::sync::Arc;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, Validation, decode, decode_header};
use serde_json::{Map, Value};

pub use introspection::Introspector;
pub use issuer::{JwtIssuer, generate_key_id};

use crate::AuthResult;
use crate::claims::Claims;
use crate::clock::{Clock, SystemClock};
use crate::error::AuthError;
use crate::jwks::{GivenKeys, JwksOptions, KeyResolver, MultiKeySet};
use crate::oauth2::{DEFAULT_HTTP_TIMEOUT, http_client};
use crate::provider::Provider;

/// How long before expiry an access token counts as needing a refresh.
pub const DEFAULT_REFRESH_LOOKAHEAD: Duration = Duration::from_secs(10);

/// Options shared by every parser strategy.
#[derive(Debug, Clone)]
pub struct ParserOptions {
    /// Accepted signature algorithms (default: `[RS256]`).
    pub algorithms: Vec<Algorithm>,

    /// Clock skew tolerated on `exp` and `nbf` (default: 0).
    pub leeway: Duration,

    /// Time source for expiry checks.
    pub clock: Arc<dyn Clock>,

    /// HTTP client for introspection calls.
    pub client: Option<reqwest::Client>,

    /// Introspection timeout when no client is injected (default: 30 s).
    pub timeout: Duration,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            algorithms: vec![Algorithm::RS256],
            leeway: Duration::ZERO,
            clock: Arc::new(SystemClock),
            client: None,
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

impl ParserOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the accepted algorithms.
    #[must_use]
    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.algorithms = algorithms;
        self
    }

    /// Sets the tolerated clock skew.
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Sets the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the HTTP client used for introspection.
    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Sets the introspection timeout used when no client is injected.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Local signature verification against resolved keys.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    resolver: Arc<dyn KeyResolver>,
    algorithms: Vec<Algorithm>,
    leeway: i64,
    clock: Arc<dyn Clock>,
}

impl SignatureVerifier {
    /// Creates a verifier on top of `resolver`.
    #[must_use]
    pub fn new(resolver: Arc<dyn KeyResolver>, options: &ParserOptions) -> Self {
        Self {
            resolver,
            algorithms: options.algorithms.clone(),
            leeway: i64::try_from(options.leeway.as_secs()).unwrap_or(i64::MAX),
            clock: options.clock.clone(),
        }
    }

    /// Verifies `token` and returns its claims.
    ///
    /// # Errors
    ///
    /// - `InvalidToken` for malformed tokens, disallowed algorithms, bad
    ///   signatures and expired or not-yet-valid tokens
    /// - `KeyNotFound`, `KeyMismatch` or `KeyFetch` from key resolution
    pub async fn verify(&self, token: &str) -> AuthResult<Claims> {
        let header = decode_header(token).map_err(|e| {
            tracing::debug!(error = %e, "Malformed token header");
            AuthError::invalid_token("malformed token")
        })?;

        if !self.algorithms.contains(&header.alg) {
            tracing::debug!(alg = ?header.alg, "Token algorithm not allowed");
            return Err(AuthError::invalid_token(format!(
                "algorithm {:?} not allowed",
                header.alg
            )));
        }

        let key = self.resolver.resolve(header.kid.as_deref()).await?;

        if let Some(expected) = key.algorithm
            && expected != header.alg
        {
            tracing::debug!(kid = %key.kid, key_alg = ?expected, token_alg = ?header.alg, "Algorithm mismatch");
            return Err(AuthError::key_mismatch(format!(
                "key '{}' is {expected:?}, token is {:?}",
                key.kid, header.alg
            )));
        }

        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<Map<String, Value>>(token, &key.key, &validation).map_err(|e| {
            tracing::debug!(kid = %key.kid, error = %e, "Token verification failed");
            AuthError::from(e)
        })?;

        let claims = Claims::from_map(data.claims)?;
        self.check_times(&claims)?;
        Ok(claims)
    }

    fn check_times(&self, claims: &Claims) -> AuthResult<()> {
        let now = self.clock.now_unix();

        if let Some(exp) = claims.expires_at()
            && exp < now.saturating_sub(self.leeway)
        {
            tracing::debug!(exp, now, "Token expired");
            return Err(AuthError::invalid_token("token expired"));
        }

        if let Some(nbf) = claims.not_before()
            && nbf > now.saturating_add(self.leeway)
        {
            tracing::debug!(nbf, now, "Token not yet valid");
            return Err(AuthError::invalid_token("token not yet valid"));
        }

        Ok(())
    }

    /// Stops the resolver's background work.
    pub async fn shutdown(&self) {
        self.resolver.shutdown().await;
    }
}

/// Parses bearer tokens into [`Claims`].
#[derive(Debug, Clone)]
pub enum TokenParser {
    /// Verify signatures locally.
    Signature(SignatureVerifier),
    /// Ask the provider's introspection endpoint.
    Introspection(Introspector),
    /// Authentication disabled.
    Noop,
}

impl TokenParser {
    /// Creates a signature parser on top of any key resolver.
    #[must_use]
    pub fn signature(resolver: Arc<dyn KeyResolver>, options: &ParserOptions) -> Self {
        Self::Signature(SignatureVerifier::new(resolver, options))
    }

    /// Picks the strategy for one provider.
    ///
    /// - noop provider: [`TokenParser::Noop`]
    /// - introspection URL set: [`TokenParser::Introspection`]
    /// - otherwise: [`TokenParser::Signature`] over a [`MultiKeySet`] with
    ///   the provider's JWKS and `given` keys
    ///
    /// # Errors
    ///
    /// - `Configuration` if the provider has no cert URL
    /// - `KeyFetch` if the initial JWKS fetch fails
    pub async fn from_provider(
        provider: Arc<dyn Provider>,
        jwks: JwksOptions,
        given: GivenKeys,
        options: ParserOptions,
    ) -> AuthResult<Self> {
        if provider.is_noop() {
            tracing::info!("Authentication disabled, using noop token parser");
            return Ok(Self::Noop);
        }

        if let Some(url) = provider.introspect_url() {
            tracing::info!(provider = provider.name(), "Using token introspection");
            let client = match &options.client {
                Some(client) => client.clone(),
                None => http_client(options.timeout)?,
            };
            let introspector =
                Introspector::new(url, provider.client_id(), provider.client_secret(), client);
            return Ok(Self::Introspection(introspector));
        }

        Self::from_providers(&[provider], jwks, given, options).await
    }

    /// Builds a signature parser resolving keys across all `providers`.
    ///
    /// Noop providers are skipped. When nothing but noop providers is given
    /// and there are no given keys, the parser is [`TokenParser::Noop`].
    ///
    /// # Errors
    ///
    /// See [`MultiKeySet::start`].
    pub async fn from_providers(
        providers: &[Arc<dyn Provider>],
        jwks: JwksOptions,
        given: GivenKeys,
        options: ParserOptions,
    ) -> AuthResult<Self> {
        if !providers.is_empty() && providers.iter().all(|p| p.is_noop()) && given.is_empty() {
            tracing::info!("Authentication disabled, using noop token parser");
            return Ok(Self::Noop);
        }

        let keys = MultiKeySet::start(providers, jwks, given).await?;
        tracing::info!(
            key_sets = keys.key_sets().len(),
            "Using signature verification"
        );
        Ok(Self::signature(Arc::new(keys), &options))
    }

    /// Verifies `token` and returns its claims.
    ///
    /// # Errors
    ///
    /// Returns a `Token`-category [`AuthError`]. The noop strategy never
    /// fails.
    pub async fn parse(&self, token: &str) -> AuthResult<Claims> {
        match self {
            Self::Signature(verifier) => verifier.verify(token).await,
            Self::Introspection(introspector) => introspector.parse(token).await,
            Self::Noop => Ok(decode_unverified(token).unwrap_or_default()),
        }
    }

    /// Returns `true` if authentication is disabled.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        matches!(self, Self::Noop)
    }

    /// Stops background key refresh.
    pub async fn shutdown(&self) {
        if let Self::Signature(verifier) = self {
            verifier.shutdown().await;
        }
    }
}

/// Decodes the payload of a compact JWT without verifying anything.
///
/// # Errors
///
/// Returns `InvalidToken` if the token is not three dot-separated parts or
/// the payload is not a JSON object.
pub fn decode_unverified(token: &str) -> AuthResult<Claims> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(AuthError::invalid_token("malformed token")),
    };

    let json = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| AuthError::invalid_token("malformed token payload"))?;

    Claims::from_json(&json)
}

/// Returns `true` if `access_token` expires before `now + lookahead`.
///
/// A token without `exp` never needs a refresh.
///
/// # Errors
///
/// Returns `InvalidToken` if the token cannot be decoded.
pub fn is_refresh_need(access_token: &str, now: i64, lookahead: Duration) -> AuthResult<bool> {
    let claims = decode_unverified(access_token)?;
    let lookahead = i64::try_from(lookahead.as_secs()).unwrap_or(i64::MAX);

    Ok(claims
        .expires_at()
        .is_some_and(|exp| exp < now.saturating_add(lookahead)))
}

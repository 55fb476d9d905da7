//! HMAC-signed tokens issued by the service itself.
//!
//! Useful for service-to-service calls that do not go through the identity
//! provider. [`JwtIssuer::given_keys`] exports the verification key so that
//! such tokens are accepted by the same [`TokenParser`](super::TokenParser)
//! as provider tokens.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde_json::{Map, Value};

use crate::AuthResult;
use crate::clock::{Clock, SystemClock};
use crate::error::AuthError;
use crate::jwks::GivenKeys;

/// Derives a key id from `secret`: the hex MD5 digest of its second half.
#[must_use]
pub fn generate_key_id(secret: &[u8]) -> String {
    format!("{:x}", md5::compute(&secret[secret.len() / 2..]))
}

/// Issues and validates HMAC tokens.
#[derive(Clone)]
pub struct JwtIssuer {
    secret: Vec<u8>,
    algorithm: Algorithm,
    kid: String,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl JwtIssuer {
    /// Creates an HS256 issuer. The kid is derived from the secret.
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        let secret = secret.into();
        Self {
            kid: generate_key_id(&secret),
            secret,
            algorithm: Algorithm::HS256,
            ttl: Duration::from_secs(3600), // 1 hour
            clock: Arc::new(SystemClock),
        }
    }

    /// Switches to another HMAC algorithm.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for non-HMAC algorithms.
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> AuthResult<Self> {
        if !matches!(
            algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(AuthError::configuration(format!(
                "issuer needs an HMAC algorithm, got {algorithm:?}"
            )));
        }
        self.algorithm = algorithm;
        Ok(self)
    }

    /// Overrides the derived kid.
    #[must_use]
    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.kid = kid.into();
        self
    }

    /// Sets the lifetime used by [`default_expiry`](Self::default_expiry).
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Key id placed in every issued token.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Signing algorithm.
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Unix time `ttl` from now.
    #[must_use]
    pub fn default_expiry(&self) -> i64 {
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        self.clock.now_unix().saturating_add(ttl)
    }

    /// Signs `claims` with `exp` set to `expires_at`.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if signing fails.
    pub fn generate(&self, claims: &Map<String, Value>, expires_at: i64) -> AuthResult<String> {
        let mut claims = claims.clone();
        claims.insert("exp".to_string(), Value::from(expires_at));

        let mut header = Header::new(self.algorithm);
        header.kid = Some(self.kid.clone());

        encode(&header, &claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|e| AuthError::internal(format!("cannot sign: {e}")))
    }

    /// Verifies a token issued with this secret and returns its claims.
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` for a bad signature, another algorithm or an
    /// expired token.
    pub fn validate(&self, token: &str) -> AuthResult<Map<String, Value>> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<Map<String, Value>>(
            token,
            &DecodingKey::from_secret(&self.secret),
            &validation,
        )
        .map_err(|e| match AuthError::from(e) {
            AuthError::KeyMismatch { message } => AuthError::invalid_token(message),
            other => other,
        })?;

        if let Some(exp) = data.claims.get("exp").and_then(Value::as_i64)
            && exp < self.clock.now_unix()
        {
            return Err(AuthError::invalid_token("token expired"));
        }

        Ok(data.claims)
    }

    /// Re-issues a valid token with a new expiry and the same claims.
    ///
    /// # Errors
    ///
    /// See [`validate`](Self::validate) and [`generate`](Self::generate).
    pub fn renew(&self, token: &str, expires_at: i64) -> AuthResult<String> {
        let claims = self.validate(token)?;
        self.generate(&claims, expires_at)
    }

    /// The verification key, for mixing into a [`GivenKeys`] set.
    #[must_use]
    pub fn given_keys(&self) -> GivenKeys {
        GivenKeys::new().with_hmac(self.kid.clone(), &self.secret, self.algorithm)
    }
}

impl fmt::Debug for JwtIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtIssuer")
            .field("algorithm", &self.algorithm)
            .field("kid", &self.kid)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

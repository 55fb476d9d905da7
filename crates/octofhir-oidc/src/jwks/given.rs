//! Caller-provided static keys.

use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey};

use super::{KeyMap, KeyResolver, VerificationKey, lookup, not_found};
use crate::AuthResult;
use crate::error::AuthError;

/// Static verification keys indexed by kid.
///
/// Given keys take priority over remote keys with the same kid.
#[derive(Debug, Clone, Default)]
pub struct GivenKeys {
    keys: KeyMap,
}

impl GivenKeys {
    /// Creates an empty key set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a verification key.
    pub fn insert(&mut self, key: VerificationKey) {
        self.keys.insert(key.kid.clone(), Arc::new(key));
    }

    /// Adds an HMAC secret restricted to `algorithm`.
    #[must_use]
    pub fn with_hmac(mut self, kid: impl Into<String>, secret: &[u8], algorithm: Algorithm) -> Self {
        self.insert(VerificationKey::new(
            kid,
            DecodingKey::from_secret(secret),
            Some(algorithm),
        ));
        self
    }

    /// Adds an RSA public key in PEM format.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the PEM cannot be parsed.
    pub fn with_rsa_pem(
        mut self,
        kid: impl Into<String>,
        pem: &[u8],
        algorithm: Algorithm,
    ) -> AuthResult<Self> {
        let key = DecodingKey::from_rsa_pem(pem)
            .map_err(|e| AuthError::configuration(format!("invalid RSA public key: {e}")))?;
        self.insert(VerificationKey::new(kid, key, Some(algorithm)));
        Ok(self)
    }

    /// Adds an EC public key in PEM format.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the PEM cannot be parsed.
    pub fn with_ec_pem(
        mut self,
        kid: impl Into<String>,
        pem: &[u8],
        algorithm: Algorithm,
    ) -> AuthResult<Self> {
        let key = DecodingKey::from_ec_pem(pem)
            .map_err(|e| AuthError::configuration(format!("invalid EC public key: {e}")))?;
        self.insert(VerificationKey::new(kid, key, Some(algorithm)));
        Ok(self)
    }

    /// Adds every key of `other`, replacing keys with the same kid.
    pub fn extend(&mut self, other: GivenKeys) {
        self.keys.extend(other.keys);
    }

    /// Returns the key for `kid` without any fallback.
    #[must_use]
    pub fn get(&self, kid: &str) -> Option<Arc<VerificationKey>> {
        self.keys.get(kid).cloned()
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if there are no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub(super) fn find(&self, kid: Option<&str>) -> Option<Arc<VerificationKey>> {
        lookup(&self.keys, kid)
    }
}

#[async_trait]
impl KeyResolver for GivenKeys {
    async fn resolve(&self, kid: Option<&str>) -> AuthResult<Arc<VerificationKey>> {
        self.find(kid).ok_or_else(|| not_found(kid))
    }
}

//! Key resolution across several providers.

use std::sync::Arc;

use async_trait::async_trait;

use super::{GivenKeys, JwksOptions, KeyResolver, KeySet, VerificationKey, not_found};
use crate::AuthResult;
use crate::error::AuthError;
use crate::provider::Provider;

/// Given keys plus one [`KeySet`] per provider cert URL.
///
/// Lookup order for a kid:
///
/// 1. given keys
/// 2. every key set's cached snapshot, in provider order
/// 3. one bounded refresh per key set, in provider order, stopping at the
///    first match
///
/// When nothing matches the result is `KeyNotFound`, even if some refresh
/// failed.
#[derive(Debug)]
pub struct MultiKeySet {
    given: GivenKeys,
    sets: Vec<KeySet>,
    refresh_unknown_kid: bool,
}

impl MultiKeySet {
    /// Starts a key set for every non-noop provider.
    ///
    /// Providers sharing a cert URL share one key set.
    ///
    /// # Errors
    ///
    /// - `Configuration` if a provider has no cert URL, or there is no key
    ///   source at all
    /// - `KeyFetch` if an initial fetch fails
    pub async fn start(
        providers: &[Arc<dyn Provider>],
        options: JwksOptions,
        given: GivenKeys,
    ) -> AuthResult<Self> {
        let mut cert_urls: Vec<&str> = Vec::new();
        for provider in providers.iter().filter(|p| !p.is_noop()) {
            let cert_url = provider.cert_url().ok_or_else(|| {
                AuthError::configuration(format!("provider '{}' has no cert url", provider.name()))
            })?;
            if !cert_urls.contains(&cert_url) {
                cert_urls.push(cert_url);
            }
        }

        if cert_urls.is_empty() && given.is_empty() {
            return Err(AuthError::configuration("no key source configured"));
        }

        let mut sets = Vec::with_capacity(cert_urls.len());
        for cert_url in cert_urls {
            sets.push(KeySet::start(cert_url, options.clone()).await?);
        }

        tracing::debug!(
            key_sets = sets.len(),
            given_keys = given.len(),
            "Started multi-provider key resolution"
        );

        Ok(Self {
            given,
            sets,
            refresh_unknown_kid: options.refresh_unknown_kid,
        })
    }

    /// Key sets in provider order.
    #[must_use]
    pub fn key_sets(&self) -> &[KeySet] {
        &self.sets
    }

    /// Static keys.
    #[must_use]
    pub fn given(&self) -> &GivenKeys {
        &self.given
    }
}

#[async_trait]
impl KeyResolver for MultiKeySet {
    async fn resolve(&self, kid: Option<&str>) -> AuthResult<Arc<VerificationKey>> {
        if let Some(key) = self.given.find(kid) {
            return Ok(key);
        }

        if let Some(key) = self.sets.iter().find_map(|set| set.cached(kid)) {
            return Ok(key);
        }

        if self.refresh_unknown_kid {
            for set in &self.sets {
                match set.refresh_for(kid).await {
                    Ok(key) => return Ok(key),
                    Err(e) => {
                        tracing::debug!(kid, cert_url = set.cert_url(), error = %e, "Key not in provider");
                    }
                }
            }
        }

        Err(not_found(kid))
    }

    async fn shutdown(&self) {
        for set in &self.sets {
            set.stop().await;
        }
    }
}

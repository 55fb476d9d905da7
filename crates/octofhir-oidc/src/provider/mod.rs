//! Identity provider abstraction.
//!
//! A [`Provider`] answers where keys, login, token, introspection and logout
//! endpoints live and which client credentials to use against them. Three
//! implementations exist:
//!
//! - [`KeycloakProvider`] derives URLs from `base_url` + `realm`
//! - [`GenericProvider`] takes every URL explicitly
//! - [`NoopProvider`] disables authentication; every getter returns
//!   [`NOOP_KEY`]
//!
//! [`ProvidersConfig`] selects the active one.

mod generic;
mod keycloak;
mod noop;

use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

pub use generic::GenericProvider;
pub use keycloak::KeycloakProvider;
pub use noop::{NOOP_KEY, NoopProvider};

use crate::AuthResult;
use crate::error::AuthError;
use crate::oauth2::{AuthStyle, ClientCredentialsConfig, TokenEndpoint};

/// Name of the Keycloak provider in configuration.
pub const PROVIDER_KEYCLOAK: &str = "keycloak";
/// Name of the generic provider in configuration.
pub const PROVIDER_GENERIC: &str = "generic";
/// Name of the noop provider in configuration.
pub const PROVIDER_NOOP: &str = "noop";

/// Endpoints and client credentials of an identity provider.
///
/// `*_external` variants are the browser-facing addresses; they fall back to
/// the internal ones when not configured.
pub trait Provider: Send + Sync + fmt::Debug {
    /// Provider name, e.g. `keycloak`.
    fn name(&self) -> &str;

    /// JWKS endpoint.
    fn cert_url(&self) -> Option<&str>;

    /// Token introspection endpoint. When set, tokens are introspected
    /// instead of verified locally.
    fn introspect_url(&self) -> Option<&str>;

    /// Authorization endpoint.
    fn auth_url(&self) -> Option<&str>;

    /// Browser-facing authorization endpoint.
    fn auth_url_external(&self) -> Option<&str> {
        self.auth_url()
    }

    /// Token endpoint.
    fn token_url(&self) -> Option<&str>;

    /// Token endpoint as reachable from outside.
    fn token_url_external(&self) -> Option<&str> {
        self.token_url()
    }

    /// End-session endpoint.
    fn logout_url(&self) -> Option<&str>;

    /// Browser-facing end-session endpoint.
    fn logout_url_external(&self) -> Option<&str> {
        self.logout_url()
    }

    /// OAuth client id.
    fn client_id(&self) -> &str;

    /// Client id used for the browser flow.
    fn client_id_external(&self) -> &str {
        self.client_id()
    }

    /// OAuth client secret.
    fn client_secret(&self) -> Option<&str>;

    /// Client secret used for the browser flow.
    fn client_secret_external(&self) -> Option<&str> {
        self.client_secret()
    }

    /// Requested scopes.
    fn scopes(&self) -> &[String];

    /// Client-credentials settings for service-to-service calls.
    ///
    /// `Ok(None)` means the provider needs no outbound token.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if no token URL resolves.
    fn client_config(&self) -> AuthResult<Option<ClientCredentialsConfig>> {
        let token_url = self
            .token_url()
            .ok_or_else(|| AuthError::configuration("token url empty"))?;

        let endpoint = TokenEndpoint::new(token_url, self.client_id())
            .with_client_secret(self.client_secret())
            .with_auth_style(AuthStyle::Basic)
            .with_scopes(self.scopes().to_vec());

        Ok(Some(ClientCredentialsConfig::new(endpoint)))
    }

    /// Returns `true` if authentication is disabled.
    fn is_noop(&self) -> bool {
        false
    }
}

/// Returns the explicit value if set, otherwise the lazily derived one.
///
/// A derivation failure is logged once and memoized as `None`.
fn resolve_url<'a>(
    explicit: &'a Option<String>,
    memo: &'a OnceLock<Option<String>>,
    what: &str,
    derive: impl FnOnce() -> AuthResult<String>,
) -> Option<&'a str> {
    if let Some(url) = explicit.as_deref().filter(|u| !u.is_empty()) {
        return Some(url);
    }

    memo.get_or_init(|| match derive() {
        Ok(url) => Some(url),
        Err(e) => {
            tracing::error!(error = %e, url = what, "Failed to derive provider URL");
            None
        }
    })
    .as_deref()
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Configured providers and the name of the active one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Active provider name: `keycloak`, `generic` or `noop`. When unset the
    /// first configured provider is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<String>,

    /// Keycloak provider settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keycloak: Option<KeycloakProvider>,

    /// Generic provider settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generic: Option<GenericProvider>,
}

impl ProvidersConfig {
    /// Returns a copy with `name` as the active provider.
    #[must_use]
    pub fn with_active(mut self, name: impl Into<String>) -> Self {
        self.active = Some(name.into());
        self
    }

    /// Returns `true` if the noop provider is explicitly active.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.active
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case(PROVIDER_NOOP))
    }

    /// Returns the active provider.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the named provider is unknown or not
    /// configured, or if no provider is configured at all.
    pub fn active_provider(&self) -> AuthResult<Arc<dyn Provider>> {
        self.select(false)
    }

    /// Returns the active provider, or [`NoopProvider`] when `force_noop`.
    ///
    /// # Errors
    ///
    /// See [`active_provider`](Self::active_provider).
    pub fn select(&self, force_noop: bool) -> AuthResult<Arc<dyn Provider>> {
        if force_noop {
            return Ok(Arc::new(NoopProvider));
        }

        match self.active.as_deref().filter(|a| !a.is_empty()) {
            Some(name) => self.named(name),
            None => {
                if self.keycloak.is_some() {
                    self.named(PROVIDER_KEYCLOAK)
                } else if self.generic.is_some() {
                    self.named(PROVIDER_GENERIC)
                } else {
                    Err(AuthError::configuration("no provider configured"))
                }
            }
        }
    }

    fn named(&self, name: &str) -> AuthResult<Arc<dyn Provider>> {
        let provider: Arc<dyn Provider> = match name.to_ascii_lowercase().as_str() {
            PROVIDER_KEYCLOAK => Arc::new(self.keycloak.clone().ok_or_else(|| {
                AuthError::configuration("keycloak provider is active but not configured")
            })?),
            PROVIDER_GENERIC => Arc::new(self.generic.clone().ok_or_else(|| {
                AuthError::configuration("generic provider is active but not configured")
            })?),
            PROVIDER_NOOP => Arc::new(NoopProvider),
            other => {
                return Err(AuthError::configuration(format!(
                    "unknown provider '{other}'"
                )));
            }
        };

        tracing::debug!(provider = provider.name(), "Selected active provider");
        Ok(provider)
    }
}

//! Keycloak provider with realm-templated endpoint URLs.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use url::Url;

use super::{PROVIDER_KEYCLOAK, Provider, non_empty, resolve_url};
use crate::AuthResult;
use crate::error::AuthError;

/// Lazily derived URLs, computed at most once.
#[derive(Debug, Clone, Default)]
struct DerivedUrls {
    cert: OnceLock<Option<String>>,
    auth: OnceLock<Option<String>>,
    auth_external: OnceLock<Option<String>>,
    token: OnceLock<Option<String>>,
    token_external: OnceLock<Option<String>>,
    logout: OnceLock<Option<String>>,
    logout_external: OnceLock<Option<String>>,
}

/// Keycloak identity provider.
///
/// Unset endpoint URLs are derived as
/// `{base_url}/realms/{realm}/protocol/openid-connect/{certs|auth|token|logout}`.
/// External variants use `base_url_external`, falling back to `base_url`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeycloakProvider {
    /// OAuth client id.
    pub client_id: String,
    /// Client id for the browser flow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id_external: Option<String>,
    /// OAuth client secret.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Client secret for the browser flow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret_external: Option<String>,
    /// Requested scopes.
    pub scopes: Vec<String>,

    /// Server base URL, e.g. `https://keycloak:8080` or `https://host/auth`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Base URL as reachable from browsers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url_external: Option<String>,
    /// Realm name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realm: Option<String>,

    /// Explicit JWKS endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_url: Option<String>,
    /// Introspection endpoint. Never derived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub introspect_url: Option<String>,
    /// Explicit authorization endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
    /// Explicit browser-facing authorization endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_url_external: Option<String>,
    /// Explicit token endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    /// Explicit external token endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_url_external: Option<String>,
    /// Explicit end-session endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logout_url: Option<String>,
    /// Explicit browser-facing end-session endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logout_url_external: Option<String>,

    #[serde(skip)]
    derived: DerivedUrls,
}

impl KeycloakProvider {
    /// Creates a provider for `realm` on the server at `base_url`.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        realm: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            base_url: Some(base_url.into()),
            realm: Some(realm.into()),
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    /// Sets the client secret.
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Sets the browser-facing base URL.
    #[must_use]
    pub fn with_base_url_external(mut self, url: impl Into<String>) -> Self {
        self.base_url_external = Some(url.into());
        self
    }

    /// Sets the introspection endpoint.
    #[must_use]
    pub fn with_introspect_url(mut self, url: impl Into<String>) -> Self {
        self.introspect_url = Some(url.into());
        self
    }

    /// Sets the requested scopes.
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<impl Into<String>>) -> Self {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    fn external_base(&self) -> Option<&str> {
        non_empty(&self.base_url_external).or_else(|| non_empty(&self.base_url))
    }

    fn realm_url(&self, base: Option<&str>, endpoint: &str) -> AuthResult<String> {
        realm_url(base, non_empty(&self.realm), endpoint)
    }
}

/// Joins `base` with the realm's OpenID Connect endpoint path.
fn realm_url(base: Option<&str>, realm: Option<&str>, endpoint: &str) -> AuthResult<String> {
    let (Some(base), Some(realm)) = (base, realm) else {
        return Err(AuthError::configuration("base_url and realm are required"));
    };

    let mut url = Url::parse(base)
        .map_err(|e| AuthError::configuration(format!("base_url is invalid: {e}")))?;

    let path = format!(
        "{}/realms/{realm}/protocol/openid-connect/{endpoint}",
        url.path().trim_end_matches('/')
    );
    url.set_path(&path);

    Ok(url.to_string())
}

impl Provider for KeycloakProvider {
    fn name(&self) -> &str {
        PROVIDER_KEYCLOAK
    }

    fn cert_url(&self) -> Option<&str> {
        resolve_url(&self.cert_url, &self.derived.cert, "cert_url", || {
            self.realm_url(non_empty(&self.base_url), "certs")
        })
    }

    fn introspect_url(&self) -> Option<&str> {
        non_empty(&self.introspect_url)
    }

    fn auth_url(&self) -> Option<&str> {
        resolve_url(&self.auth_url, &self.derived.auth, "auth_url", || {
            self.realm_url(non_empty(&self.base_url), "auth")
        })
    }

    fn auth_url_external(&self) -> Option<&str> {
        resolve_url(
            &self.auth_url_external,
            &self.derived.auth_external,
            "auth_url_external",
            || self.realm_url(self.external_base(), "auth"),
        )
    }

    fn token_url(&self) -> Option<&str> {
        resolve_url(&self.token_url, &self.derived.token, "token_url", || {
            self.realm_url(non_empty(&self.base_url), "token")
        })
    }

    fn token_url_external(&self) -> Option<&str> {
        resolve_url(
            &self.token_url_external,
            &self.derived.token_external,
            "token_url_external",
            || self.realm_url(self.external_base(), "token"),
        )
    }

    fn logout_url(&self) -> Option<&str> {
        resolve_url(&self.logout_url, &self.derived.logout, "logout_url", || {
            self.realm_url(non_empty(&self.base_url), "logout")
        })
    }

    fn logout_url_external(&self) -> Option<&str> {
        resolve_url(
            &self.logout_url_external,
            &self.derived.logout_external,
            "logout_url_external",
            || self.realm_url(self.external_base(), "logout"),
        )
    }

    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn client_id_external(&self) -> &str {
        non_empty(&self.client_id_external).unwrap_or(self.client_id.as_str())
    }

    fn client_secret(&self) -> Option<&str> {
        non_empty(&self.client_secret)
    }

    fn client_secret_external(&self) -> Option<&str> {
        non_empty(&self.client_secret_external).or_else(|| self.client_secret())
    }

    fn scopes(&self) -> &[String] {
        &self.scopes
    }
}

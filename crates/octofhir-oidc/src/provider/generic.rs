//! Provider configured with explicit endpoint URLs.

use serde::{Deserialize, Serialize};

use super::{PROVIDER_GENERIC, Provider, non_empty};

/// Generic OIDC provider. Nothing is derived; unset URLs stay unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenericProvider {
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

    /// JWKS endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_url: Option<String>,
    /// Introspection endpoint. When set the cert URL is not used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub introspect_url: Option<String>,
    /// Authorization endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
    /// Browser-facing authorization endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_url_external: Option<String>,
    /// Token endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    /// External token endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_url_external: Option<String>,
    /// End-session endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logout_url: Option<String>,
    /// Browser-facing end-session endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logout_url_external: Option<String>,
}

impl GenericProvider {
    /// Creates a provider with only a client id.
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
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

    /// Sets the JWKS endpoint.
    #[must_use]
    pub fn with_cert_url(mut self, url: impl Into<String>) -> Self {
        self.cert_url = Some(url.into());
        self
    }

    /// Sets the introspection endpoint.
    #[must_use]
    pub fn with_introspect_url(mut self, url: impl Into<String>) -> Self {
        self.introspect_url = Some(url.into());
        self
    }

    /// Sets the authorization endpoint.
    #[must_use]
    pub fn with_auth_url(mut self, url: impl Into<String>) -> Self {
        self.auth_url = Some(url.into());
        self
    }

    /// Sets the token endpoint.
    #[must_use]
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = Some(url.into());
        self
    }

    /// Sets the end-session endpoint.
    #[must_use]
    pub fn with_logout_url(mut self, url: impl Into<String>) -> Self {
        self.logout_url = Some(url.into());
        self
    }

    /// Sets the requested scopes.
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<impl Into<String>>) -> Self {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }
}

impl Provider for GenericProvider {
    fn name(&self) -> &str {
        PROVIDER_GENERIC
    }

    fn cert_url(&self) -> Option<&str> {
        non_empty(&self.cert_url)
    }

    fn introspect_url(&self) -> Option<&str> {
        non_empty(&self.introspect_url)
    }

    fn auth_url(&self) -> Option<&str> {
        non_empty(&self.auth_url)
    }

    fn auth_url_external(&self) -> Option<&str> {
        non_empty(&self.auth_url_external).or_else(|| self.auth_url())
    }

    fn token_url(&self) -> Option<&str> {
        non_empty(&self.token_url)
    }

    fn token_url_external(&self) -> Option<&str> {
        non_empty(&self.token_url_external).or_else(|| self.token_url())
    }

    fn logout_url(&self) -> Option<&str> {
        non_empty(&self.logout_url)
    }

    fn logout_url_external(&self) -> Option<&str> {
        non_empty(&self.logout_url_external).or_else(|| self.logout_url())
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

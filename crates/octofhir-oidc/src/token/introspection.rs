//! Token introspection client (RFC 7662).
//!
//! The provider's introspection endpoint decides whether a token is valid.
//! Only `active` is read from the response; claims come from the token
//! payload itself once the provider has vouched for it.

use std::fmt;

use serde::Deserialize;
use url::Url;

use super::decode_unverified;
use crate::AuthResult;
use crate::claims::Claims;
use crate::error::AuthError;
use crate::oauth2::query_escape;

#[derive(Debug, Deserialize)]
struct IntrospectionResponse {
    #[serde(default)]
    active: bool,
}

/// Client for a provider's introspection endpoint.
#[derive(Clone)]
pub struct Introspector {
    url: String,
    client_id: String,
    client_secret: Option<String>,
    http: reqwest::Client,
}

impl Introspector {
    /// Creates an introspector.
    ///
    /// With a secret the client authenticates with HTTP Basic; without one
    /// it sends `client_id` as a query parameter.
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: Option<&str>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            url: url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.filter(|s| !s.is_empty()).map(str::to_string),
            http,
        }
    }

    /// Introspection endpoint.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Checks `token` with the provider and decodes its payload.
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` if the provider rejects the token or cannot be
    /// reached, or the payload cannot be decoded.
    pub async fn parse(&self, token: &str) -> AuthResult<Claims> {
        self.check(token).await?;
        decode_unverified(token)
    }

    /// Asks the provider whether `token` is active.
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` on transport failure, a non-2xx response, an
    /// unreadable body or `active != true`.
    pub async fn check(&self, token: &str) -> AuthResult<()> {
        let mut url = Url::parse(&self.url).map_err(|e| {
            AuthError::configuration(format!("invalid introspect url '{}': {e}", self.url))
        })?;

        if self.client_secret.is_none() {
            url.query_pairs_mut()
                .append_pair("client_id", &self.client_id);
        }

        let mut request = self
            .http
            .post(url)
            .header(http::header::ACCEPT, "application/json")
            .form(&[("token", token), ("token_type_hint", "access_token")]);

        if let Some(secret) = &self.client_secret {
            request = request.basic_auth(query_escape(&self.client_id), Some(query_escape(secret)));
        }

        let response = request.send().await.map_err(|e| {
            tracing::debug!(error = %e, "Introspection request failed");
            AuthError::invalid_token("introspection failed")
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(status = %status, "Introspection endpoint rejected request");
            return Err(AuthError::invalid_token("introspection failed"));
        }

        let body: IntrospectionResponse = response.json().await.map_err(|e| {
            tracing::debug!(error = %e, "Malformed introspection response");
            AuthError::invalid_token("introspection failed")
        })?;

        if !body.active {
            tracing::debug!("Token is not active");
            return Err(AuthError::invalid_token("token is not active"));
        }

        Ok(())
    }
}

impl fmt::Debug for Introspector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Introspector")
            .field("url", &self.url)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

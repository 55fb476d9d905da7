//! OAuth 2.0 token endpoint client.
//!
//! Every grant is a form-encoded `POST` to the token URL with
//! `Accept: application/json`. Client authentication follows [`AuthStyle`].
//! A 2xx body is parsed into a [`TokenRecord`]; anything else becomes
//! [`AuthError::TokenExchange`] carrying the raw response body.
//!
//! Requests are bounded by the timeout of the `reqwest::Client`, either the
//! injected one or one built by [`http_client`]. Dropping the returned future
//! cancels the request.

pub mod source;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::AuthResult;
use crate::error::AuthError;
use crate::store::TokenRecord;

pub use source::ClientCredentialsSource;

/// Per-request timeout of HTTP clients built when none is injected.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30); // 30 seconds

/// Builds an HTTP client whose requests give up after `timeout`.
///
/// # Errors
///
/// Returns `Configuration` if the client cannot be built.
pub fn http_client(timeout: Duration) -> AuthResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AuthError::configuration(format!("http client: {e}")))
}

/// How the client authenticates to the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStyle {
    /// `Authorization: Basic` with URL-encoded id and secret. Only sent when a
    /// secret is configured.
    #[default]
    Basic,
    /// `Authorization: Bearer <client secret>`.
    BearerSecret,
    /// `client_id` and `client_secret` as query parameters.
    Params,
}

/// Token endpoint and the client credentials used against it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenEndpoint {
    /// Token endpoint URL.
    pub token_url: String,
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret, absent for public clients.
    pub client_secret: Option<String>,
    /// Client authentication style.
    pub auth_style: AuthStyle,
    /// Scopes sent with refresh, password and client-credentials grants.
    pub scopes: Vec<String>,
}

impl TokenEndpoint {
    /// Creates an endpoint for a public client.
    #[must_use]
    pub fn new(token_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            token_url: token_url.into(),
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    /// Sets the client secret. Empty secrets are ignored.
    #[must_use]
    pub fn with_client_secret(mut self, secret: Option<&str>) -> Self {
        self.client_secret = secret.filter(|s| !s.is_empty()).map(str::to_string);
        self
    }

    /// Sets the client authentication style.
    #[must_use]
    pub fn with_auth_style(mut self, style: AuthStyle) -> Self {
        self.auth_style = style;
        self
    }

    /// Sets the requested scopes.
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    fn scope_param(&self) -> Option<String> {
        (!self.scopes.is_empty()).then(|| self.scopes.join(" "))
    }
}

/// Settings for the client-credentials grant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientCredentialsConfig {
    /// Token endpoint and credentials.
    pub endpoint: TokenEndpoint,
    /// Extra form parameters sent with every request.
    pub endpoint_params: Vec<(String, String)>,
}

impl ClientCredentialsConfig {
    /// Creates a configuration for `endpoint` with no extra parameters.
    #[must_use]
    pub fn new(endpoint: TokenEndpoint) -> Self {
        Self {
            endpoint,
            endpoint_params: Vec::new(),
        }
    }

    /// Adds an extra form parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.endpoint_params.push((key.into(), value.into()));
        self
    }
}

/// Client for the grants the core needs.
#[derive(Debug, Clone)]
pub struct TokenClient {
    http: reqwest::Client,
}

impl TokenClient {
    /// Creates a client on top of an existing HTTP client.
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Creates a client with its own HTTP client bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the HTTP client cannot be built.
    pub fn with_timeout(timeout: Duration) -> AuthResult<Self> {
        http_client(timeout).map(Self::new)
    }

    /// Exchanges an authorization code.
    ///
    /// # Errors
    ///
    /// Returns `TokenExchange` on transport failure or a non-2xx response.
    pub async fn authorization_code(
        &self,
        endpoint: &TokenEndpoint,
        code: &str,
        redirect_uri: &str,
    ) -> AuthResult<TokenRecord> {
        let form = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("redirect_uri", redirect_uri.to_string()),
            ("client_id", endpoint.client_id.clone()),
        ];
        self.request(endpoint, &form).await
    }

    /// Exchanges a refresh token for a new token set.
    ///
    /// # Errors
    ///
    /// Returns `TokenExchange` on transport failure or a non-2xx response.
    pub async fn refresh_token(
        &self,
        endpoint: &TokenEndpoint,
        refresh_token: &str,
    ) -> AuthResult<TokenRecord> {
        let mut form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("client_id", endpoint.client_id.clone()),
            ("refresh_token", refresh_token.to_string()),
        ];
        if let Some(scope) = endpoint.scope_param() {
            form.push(("scope", scope));
        }
        self.request(endpoint, &form).await
    }

    /// Requests a service token with the client-credentials grant.
    ///
    /// # Errors
    ///
    /// Returns `TokenExchange` on transport failure or a non-2xx response.
    pub async fn client_credentials(
        &self,
        config: &ClientCredentialsConfig,
    ) -> AuthResult<TokenRecord> {
        let mut form = vec![("grant_type", "client_credentials".to_string())];
        if let Some(scope) = config.endpoint.scope_param() {
            form.push(("scope", scope));
        }
        for (key, value) in &config.endpoint_params {
            form.push((key.as_str(), value.clone()));
        }
        self.request(&config.endpoint, &form).await
    }

    /// Requests a token with the resource-owner password grant.
    ///
    /// # Errors
    ///
    /// Returns `TokenExchange` on transport failure or a non-2xx response.
    pub async fn password(
        &self,
        endpoint: &TokenEndpoint,
        username: &str,
        password: &str,
    ) -> AuthResult<TokenRecord> {
        let mut form = vec![
            ("grant_type", "password".to_string()),
            ("username", username.to_string()),
            ("password", password.to_string()),
        ];
        if let Some(scope) = endpoint.scope_param() {
            form.push(("scope", scope));
        }
        self.request(endpoint, &form).await
    }

    async fn request(
        &self,
        endpoint: &TokenEndpoint,
        form: &[(&str, String)],
    ) -> AuthResult<TokenRecord> {
        let body = self.send(endpoint, form).await?;
        TokenRecord::from_response(&body)
    }

    /// Posts `form` to the token endpoint and returns the raw 2xx body.
    async fn send(&self, endpoint: &TokenEndpoint, form: &[(&str, String)]) -> AuthResult<Vec<u8>> {
        let mut url = Url::parse(&endpoint.token_url).map_err(|e| {
            AuthError::configuration(format!("invalid token url '{}': {e}", endpoint.token_url))
        })?;

        if endpoint.auth_style == AuthStyle::Params {
            let mut query = url.query_pairs_mut();
            if !endpoint.client_id.is_empty() {
                query.append_pair("client_id", &endpoint.client_id);
            }
            if let Some(secret) = &endpoint.client_secret {
                query.append_pair("client_secret", secret);
            }
        }

        let mut request = self
            .http
            .post(url)
            .header(http::header::ACCEPT, "application/json")
            .form(form);

        match (endpoint.auth_style, &endpoint.client_secret) {
            (AuthStyle::Basic, Some(secret)) => {
                request = request.basic_auth(
                    query_escape(&endpoint.client_id),
                    Some(query_escape(secret)),
                );
            }
            (AuthStyle::BearerSecret, Some(secret)) => {
                request = request.bearer_auth(secret);
            }
            _ => {}
        }

        let response = request.send().await.map_err(|e| {
            tracing::debug!(error = %e, "Token endpoint request failed");
            AuthError::token_exchange(e.to_string())
        })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| AuthError::token_exchange(e.to_string()))?;

        if !status.is_success() {
            tracing::debug!(status = %status, "Token endpoint rejected request");
            return Err(AuthError::token_exchange(
                String::from_utf8_lossy(&body).into_owned(),
            ));
        }

        Ok(body.to_vec())
    }
}

/// Form-encodes a credential for use inside HTTP Basic authentication.
pub(crate) fn query_escape(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_string_contains, header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client() -> TokenClient {
        TokenClient::with_timeout(crate::oauth2::DEFAULT_HTTP_TIMEOUT).unwrap()
    }

    fn token_body() -> serde_json::Value {
        serde_json::json!({
            "access_token": "tok1",
            "expires_in": 300,
            "refresh_token": "r1",
            "token_type": "Bearer"
        })
    }

    #[test]
    fn test_query_escape() {
        assert_eq!(query_escape("my client"), "my+client");
        assert_eq!(query_escape("s3cr3t/&"), "s3cr3t%2F%26");
    }

    #[test]
    fn test_empty_secret_is_ignored() {
        let endpoint = TokenEndpoint::new("http://idp/token", "app").with_client_secret(Some(""));
        assert!(endpoint.client_secret.is_none());
    }

    #[tokio::test]
    async fn test_authorization_code_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(header("accept", "application/json"))
            .and(header_exists("authorization"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=abc"))
            .and(body_string_contains("client_id=app"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body()))
            .expect(1)
            .mount(&server)
            .await;

        let endpoint = TokenEndpoint::new(format!("{}/token", server.uri()), "app")
            .with_client_secret(Some("secret"));
        let record = client()
            .authorization_code(&endpoint, "abc", "https://app/callback")
            .await
            .unwrap();

        assert_eq!(record.access_token, "tok1");
        assert_eq!(record.refresh_token, "r1");
    }

    #[tokio::test]
    async fn test_refresh_grant_sends_scope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=r1"))
            .and(body_string_contains("scope=openid+email"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body()))
            .expect(1)
            .mount(&server)
            .await;

        let endpoint = TokenEndpoint::new(server.uri(), "app")
            .with_scopes(vec!["openid".to_string(), "email".to_string()]);
        let record = client()
            .refresh_token(&endpoint, "r1")
            .await
            .unwrap();
        assert_eq!(record.access_token, "tok1");
    }

    #[tokio::test]
    async fn test_params_auth_style() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(query_param("client_id", "app"))
            .and(query_param("client_secret", "secret"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("audience=api"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body()))
            .expect(1)
            .mount(&server)
            .await;

        let endpoint = TokenEndpoint::new(server.uri(), "app")
            .with_client_secret(Some("secret"))
            .with_auth_style(AuthStyle::Params);
        let config = ClientCredentialsConfig::new(endpoint).with_param("audience", "api");

        client()
            .client_credentials(&config)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_bearer_secret_auth_style() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer secret"))
            .and(body_string_contains("grant_type=password"))
            .and(body_string_contains("username=alice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body()))
            .expect(1)
            .mount(&server)
            .await;

        let endpoint = TokenEndpoint::new(server.uri(), "app")
            .with_client_secret(Some("secret"))
            .with_auth_style(AuthStyle::BearerSecret);

        client()
            .password(&endpoint, "alice", "pw")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_non_success_carries_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#),
            )
            .mount(&server)
            .await;

        let endpoint = TokenEndpoint::new(server.uri(), "app");
        let err = client()
            .refresh_token(&endpoint, "expired")
            .await
            .unwrap_err();

        match err {
            AuthError::TokenExchange { message } => assert!(message.contains("invalid_grant")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_slow_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(token_body())
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let endpoint = TokenEndpoint::new(server.uri(), "app");
        let err = TokenClient::with_timeout(Duration::from_millis(200))
            .unwrap()
            .refresh_token(&endpoint, "r1")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenExchange { .. }));
    }
}

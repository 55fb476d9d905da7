//! Cached client-credentials tokens for outbound service calls.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use super::{ClientCredentialsConfig, TokenClient};
use crate::AuthResult;
use crate::clock::{Clock, SystemClock};
use crate::store::TokenRecord;

struct CachedToken {
    record: TokenRecord,
    /// Unix seconds; `None` when the endpoint sent no lifetime.
    expires_at: Option<i64>,
}

/// Token source for the client-credentials grant.
///
/// The first call fetches a token; later calls reuse it until it comes
/// within `lookahead` of its expiry. Concurrent callers share one fetch.
pub struct ClientCredentialsSource {
    client: TokenClient,
    config: ClientCredentialsConfig,
    clock: Arc<dyn Clock>,
    lookahead: Duration,
    cached: Mutex<Option<CachedToken>>,
}

impl ClientCredentialsSource {
    /// Creates a source with a 10 second expiry lookahead.
    #[must_use]
    pub fn new(client: TokenClient, config: ClientCredentialsConfig) -> Self {
        Self {
            client,
            config,
            clock: Arc::new(SystemClock),
            lookahead: Duration::from_secs(10), // 10 seconds
            cached: Mutex::new(None),
        }
    }

    /// Sets the clock used for expiry checks.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets how long before expiry a token is replaced.
    #[must_use]
    pub fn with_lookahead(mut self, lookahead: Duration) -> Self {
        self.lookahead = lookahead;
        self
    }

    /// Returns a valid token, fetching a new one if needed.
    ///
    /// # Errors
    ///
    /// Returns `TokenExchange` if the token endpoint rejects the request.
    pub async fn token(&self) -> AuthResult<TokenRecord> {
        let mut cached = self.cached.lock().await;
        let now = self.clock.now_unix();
        let lookahead = i64::try_from(self.lookahead.as_secs()).unwrap_or(i64::MAX);

        if let Some(entry) = cached.as_ref() {
            let fresh = entry
                .expires_at
                .is_none_or(|exp| now.saturating_add(lookahead) < exp);
            if fresh {
                return Ok(entry.record.clone());
            }
        }

        tracing::debug!(
            token_url = %self.config.endpoint.token_url,
            "Fetching client credentials token"
        );
        let record = self.client.client_credentials(&self.config).await?;
        let expires_at = (record.expires_in > 0).then(|| now.saturating_add(record.expires_in));

        *cached = Some(CachedToken {
            record: record.clone(),
            expires_at,
        });
        Ok(record)
    }

    /// Returns an `Authorization` header value for the current token.
    ///
    /// # Errors
    ///
    /// Returns `TokenExchange` if no token can be obtained.
    pub async fn bearer_header(&self) -> AuthResult<String> {
        let record = self.token().await?;
        Ok(format!("Bearer {}", record.access_token))
    }

    /// Drops the cached token so the next call fetches a new one.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}

impl std::fmt::Debug for ClientCredentialsSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentialsSource")
            .field("token_url", &self.config.endpoint.token_url)
            .field("client_id", &self.config.endpoint.client_id)
            .field("lookahead", &self.lookahead)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::clock::FixedClock;
    use crate::oauth2::TokenEndpoint;

    fn client() -> TokenClient {
        TokenClient::with_timeout(crate::oauth2::DEFAULT_HTTP_TIMEOUT).unwrap()
    }

    async fn server_with_token(expected_calls: u64) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "svc",
                "expires_in": 60,
                "token_type": "Bearer"
            })))
            .expect(expected_calls)
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_token_is_reused_until_near_expiry() {
        let server = server_with_token(2).await;
        let clock = Arc::new(FixedClock::new(1_000));

        let config = ClientCredentialsConfig::new(
            TokenEndpoint::new(server.uri(), "svc").with_client_secret(Some("secret")),
        );
        let source = ClientCredentialsSource::new(client(), config)
            .with_clock(clock.clone());

        assert_eq!(source.bearer_header().await.unwrap(), "Bearer svc");
        clock.advance(40);
        source.token().await.unwrap();

        // 1_051 + 10 >= 1_060
        clock.advance(11);
        source.token().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalidate_forces_fetch() {
        let server = server_with_token(2).await;
        let config = ClientCredentialsConfig::new(TokenEndpoint::new(server.uri(), "svc"));
        let source = ClientCredentialsSource::new(client(), config);

        source.token().await.unwrap();
        source.invalidate().await;
        source.token().await.unwrap();
    }
}

//! Remote key set with background refresh.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::{JwkSet, PublicKeyUse};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use url::Url;

use super::{
    JwksOptions, KeyMap, KeyResolver, VerificationKey, jwk_algorithm, lookup, not_found,
};
use crate::AuthResult;
use crate::error::AuthError;

/// Handle for the background refresh task.
struct RefreshTask {
    handle: JoinHandle<()>,
    shutdown: oneshot::Sender<()>,
}

impl RefreshTask {
    async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }
}

struct Inner {
    cert_url: String,
    http: reqwest::Client,
    options: JwksOptions,
    keys: ArcSwap<KeyMap>,
    /// Serializes refreshes; holds the start time of the last one.
    last_refresh: Mutex<Option<Instant>>,
}

impl Inner {
    async fn fetch(&self) -> AuthResult<KeyMap> {
        tracing::debug!(cert_url = %self.cert_url, "Fetching JWKS");

        let response = self
            .http
            .get(&self.cert_url)
            .header(http::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| AuthError::key_fetch(format!("{}: {e}", self.cert_url)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::key_fetch(format!(
                "{} returned status {status}",
                self.cert_url
            )));
        }

        let set: JwkSet = response
            .json()
            .await
            .map_err(|e| AuthError::key_fetch(format!("malformed JWKS: {e}")))?;

        let mut keys = KeyMap::new();
        for jwk in &set.keys {
            let Some(kid) = jwk.common.key_id.as_deref() else {
                tracing::trace!("Skipping JWK without kid");
                continue;
            };
            if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
                continue;
            }
            match DecodingKey::from_jwk(jwk) {
                Ok(key) => {
                    keys.insert(
                        kid.to_string(),
                        Arc::new(VerificationKey::new(kid, key, jwk_algorithm(jwk))),
                    );
                }
                Err(e) => tracing::debug!(kid, error = %e, "Skipping unusable JWK"),
            }
        }

        tracing::debug!(cert_url = %self.cert_url, count = keys.len(), "Fetched JWKS");
        Ok(keys)
    }

    async fn fetch_bounded(&self) -> AuthResult<KeyMap> {
        tokio::time::timeout(self.options.refresh_timeout, self.fetch())
            .await
            .map_err(|_| {
                AuthError::key_fetch(format!("{}: refresh timed out", self.cert_url))
            })?
    }

    async fn refresh(&self) -> AuthResult<()> {
        let mut last = self.last_refresh.lock().await;
        *last = Some(Instant::now());

        let keys = self.fetch_bounded().await?;
        self.keys.store(Arc::new(keys));
        Ok(())
    }

    async fn refresh_for(&self, kid: Option<&str>) -> AuthResult<Arc<VerificationKey>> {
        let mut last = self.last_refresh.lock().await;

        // a refresh may have landed while we waited for the lock
        if let Some(key) = lookup(&self.keys.load(), kid) {
            return Ok(key);
        }

        let limit = self.options.refresh_rate_limit;
        if let Some(at) = *last {
            if !limit.is_zero() && at.elapsed() < limit {
                tracing::debug!(kid, cert_url = %self.cert_url, "Unknown kid refresh rate limited");
                return Err(not_found(kid));
            }
        }

        tracing::debug!(kid, cert_url = %self.cert_url, "Refreshing JWKS for unknown kid");
        *last = Some(Instant::now());

        let keys = self.fetch_bounded().await?;
        let found = lookup(&keys, kid);
        self.keys.store(Arc::new(keys));

        found.ok_or_else(|| not_found(kid))
    }
}

/// Keys of one JWKS endpoint, cached and refreshed in the background.
///
/// The initial fetch happens in [`start`](Self::start) and must succeed.
/// A failed background refresh keeps serving the previous keys.
pub struct KeySet {
    inner: Arc<Inner>,
    task: StdMutex<Option<RefreshTask>>,
}

impl KeySet {
    /// Fetches the key set at `cert_url` and starts the refresh task.
    ///
    /// # Errors
    ///
    /// - `Configuration` if the URL is invalid or not HTTPS (unless
    ///   `allow_http`), or the HTTP client cannot be built
    /// - `KeyFetch` if the initial fetch fails
    pub async fn start(cert_url: impl Into<String>, options: JwksOptions) -> AuthResult<Self> {
        let cert_url = cert_url.into();
        validate_scheme(&cert_url, options.allow_http)?;

        let http = match &options.client {
            Some(client) => client.clone(),
            None => reqwest::Client::builder()
                .timeout(options.refresh_timeout)
                .build()
                .map_err(|e| AuthError::configuration(format!("http client: {e}")))?,
        };

        let inner = Arc::new(Inner {
            cert_url,
            http,
            options,
            keys: ArcSwap::from_pointee(KeyMap::new()),
            last_refresh: Mutex::new(None),
        });

        let keys = inner.fetch_bounded().await?;
        inner.keys.store(Arc::new(keys));

        let task = if inner.options.refresh_interval.is_zero() {
            None
        } else {
            Some(spawn_refresh(inner.clone()))
        };

        Ok(Self {
            inner,
            task: StdMutex::new(task),
        })
    }

    /// JWKS endpoint URL.
    #[must_use]
    pub fn cert_url(&self) -> &str {
        &self.inner.cert_url
    }

    /// Current key snapshot.
    #[must_use]
    pub fn keys(&self) -> Arc<KeyMap> {
        self.inner.keys.load_full()
    }

    /// Looks up `kid` in the current snapshot without any refresh.
    #[must_use]
    pub fn cached(&self, kid: Option<&str>) -> Option<Arc<VerificationKey>> {
        lookup(&self.inner.keys.load(), kid)
    }

    /// Refetches the key set now. On failure the previous keys stay.
    ///
    /// # Errors
    ///
    /// Returns `KeyFetch` if the endpoint fails or times out.
    pub async fn refresh(&self) -> AuthResult<()> {
        self.inner.refresh().await
    }

    /// Performs the bounded, rate-limited refresh for an unknown kid.
    ///
    /// # Errors
    ///
    /// - `KeyNotFound` if rate limited or the kid is still missing
    /// - `KeyFetch` if the refresh fails
    pub async fn refresh_for(&self, kid: Option<&str>) -> AuthResult<Arc<VerificationKey>> {
        self.inner.refresh_for(kid).await
    }

    /// Returns `true` while the background refresh task runs.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Stops the background task and waits for it to finish.
    pub async fn stop(&self) {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            task.stop().await;
            tracing::debug!(cert_url = %self.inner.cert_url, "JWKS refresh task stopped");
        }
    }
}

impl Drop for KeySet {
    fn drop(&mut self) {
        let task = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.handle.abort();
        }
    }
}

impl std::fmt::Debug for KeySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySet")
            .field("cert_url", &self.inner.cert_url)
            .field("keys", &self.inner.keys.load().len())
            .field("options", &self.inner.options)
            .finish()
    }
}

#[async_trait]
impl KeyResolver for KeySet {
    async fn resolve(&self, kid: Option<&str>) -> AuthResult<Arc<VerificationKey>> {
        if let Some(key) = self.cached(kid) {
            return Ok(key);
        }
        if !self.inner.options.refresh_unknown_kid {
            return Err(not_found(kid));
        }
        self.refresh_for(kid).await
    }

    async fn shutdown(&self) {
        self.stop().await;
    }
}

fn spawn_refresh(inner: Arc<Inner>) -> RefreshTask {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
    let interval = inner.options.refresh_interval;

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    tracing::debug!(cert_url = %inner.cert_url, "JWKS refresh task shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = inner.refresh().await {
                        inner.options.report(&inner.cert_url, &e);
                    }
                }
            }
        }
    });

    RefreshTask {
        handle,
        shutdown: shutdown_tx,
    }
}

/// Validates that the URL uses an allowed scheme.
fn validate_scheme(cert_url: &str, allow_http: bool) -> AuthResult<()> {
    let url = Url::parse(cert_url)
        .map_err(|e| AuthError::configuration(format!("invalid cert url '{cert_url}': {e}")))?;

    match url.scheme() {
        "https" => Ok(()),
        "http" if allow_http => Ok(()),
        scheme => Err(AuthError::configuration(format!(
            "cert url scheme '{scheme}' not allowed"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::test_support::{TestKey, jwks};

    fn options() -> JwksOptions {
        JwksOptions::default()
            .with_allow_http(true)
            .with_refresh_interval(Duration::ZERO)
    }

    async fn serve(server: &MockServer, body: serde_json::Value, expect: Option<u64>) {
        let mock = Mock::given(method("GET"))
            .and(path("/certs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body));
        let mock = match expect {
            Some(n) => mock.expect(n),
            None => mock,
        };
        mock.mount(server).await;
    }

    fn cert_url(server: &MockServer) -> String {
        format!("{}/certs", server.uri())
    }

    #[test]
    fn test_validate_scheme() {
        assert!(validate_scheme("https://idp/certs", false).is_ok());
        assert!(validate_scheme("http://idp/certs", false).is_err());
        assert!(validate_scheme("http://idp/certs", true).is_ok());
        assert!(validate_scheme("ftp://idp/certs", true).is_err());
        assert!(validate_scheme("not a url", true).is_err());
    }

    #[tokio::test]
    async fn test_start_indexes_signing_keys() {
        let server = MockServer::start().await;
        let k1 = TestKey::new("k1", 0);
        let mut enc = TestKey::new("enc", 1).jwk();
        enc["use"] = json!("enc");
        let mut no_kid = TestKey::new("x", 1).jwk();
        no_kid.as_object_mut().unwrap().remove("kid");

        serve(&server, json!({ "keys": [k1.jwk(), enc, no_kid] }), None).await;

        let set = KeySet::start(cert_url(&server), options()).await.unwrap();
        let keys = set.keys();
        assert_eq!(keys.len(), 1);
        assert!(keys.contains_key("k1"));
        assert_eq!(
            set.cached(Some("k1")).unwrap().algorithm,
            Some(jsonwebtoken::Algorithm::RS256)
        );
    }

    #[tokio::test]
    async fn test_start_fails_when_endpoint_down() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = KeySet::start(cert_url(&server), options()).await.unwrap_err();
        assert!(matches!(err, AuthError::KeyFetch { .. }));
    }

    #[tokio::test]
    async fn test_http_rejected_by_default() {
        let err = KeySet::start("http://127.0.0.1:1/certs", JwksOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_unknown_kid_refresh_is_rate_limited() {
        let server = MockServer::start().await;
        let k1 = TestKey::new("k1", 0);
        let k2 = TestKey::new("k2", 1);
        serve(&server, jwks(&[&k1]), Some(1)).await;

        let set = KeySet::start(cert_url(&server), options()).await.unwrap();
        server.verify().await;
        server.reset().await;
        serve(&server, jwks(&[&k1, &k2]), Some(1)).await;

        assert_eq!(set.resolve(Some("k2")).await.unwrap().kid, "k2");

        // second unknown kid inside the rate limit: no request
        let err = set.resolve(Some("k3")).await.unwrap_err();
        assert!(matches!(err, AuthError::KeyNotFound { ref kid } if kid == "k3"));
    }

    #[tokio::test]
    async fn test_unknown_kid_refresh_disabled() {
        let server = MockServer::start().await;
        serve(&server, jwks(&[&TestKey::new("k1", 0)]), Some(1)).await;

        let set = KeySet::start(
            cert_url(&server),
            options().with_refresh_unknown_kid(false),
        )
        .await
        .unwrap();

        assert!(matches!(
            set.resolve(Some("k2")).await,
            Err(AuthError::KeyNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_unknown_kid_single_fetch() {
        let server = MockServer::start().await;
        let k1 = TestKey::new("k1", 0);
        let k2 = TestKey::new("k2", 1);
        serve(&server, jwks(&[&k1]), None).await;

        let set = Arc::new(KeySet::start(cert_url(&server), options()).await.unwrap());
        server.reset().await;
        serve(&server, jwks(&[&k1, &k2]), Some(1)).await;

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let set = set.clone();
                tokio::spawn(async move { set.resolve(Some("k2")).await })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().kid, "k2");
        }
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_keys() {
        let server = MockServer::start().await;
        let k1 = TestKey::new("k1", 0);
        let k2 = TestKey::new("k2", 1);
        serve(&server, jwks(&[&k1]), None).await;

        let set = KeySet::start(cert_url(&server), options()).await.unwrap();

        server.reset().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        assert!(matches!(set.refresh().await, Err(AuthError::KeyFetch { .. })));
        assert!(set.resolve(Some("k1")).await.is_ok());

        server.reset().await;
        serve(&server, jwks(&[&k2]), None).await;
        set.refresh().await.unwrap();

        assert!(set.cached(Some("k2")).is_some());
        // rate limited right after the refresh, so no refetch brings k1 back
        assert!(matches!(
            set.resolve(Some("k1")).await,
            Err(AuthError::KeyNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_background_refresh_and_stop() {
        let server = MockServer::start().await;
        let k1 = TestKey::new("k1", 0);
        let k2 = TestKey::new("k2", 1);
        serve(&server, jwks(&[&k1]), None).await;

        let set = KeySet::start(
            cert_url(&server),
            options().with_refresh_interval(Duration::from_millis(50)),
        )
        .await
        .unwrap();
        assert!(set.is_running());

        server.reset().await;
        serve(&server, jwks(&[&k2]), None).await;

        let mut rotated = false;
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(25)).await;
            if set.cached(Some("k2")).is_some() {
                rotated = true;
                break;
            }
        }
        assert!(rotated);

        set.stop().await;
        assert!(!set.is_running());
    }
}

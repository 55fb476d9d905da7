//! The redirect flow state machine.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::HeaderMap;
use http::header::{AUTHORIZATION, HeaderValue, USER_AGENT};
use http::request::Parts;
use regex::Regex;

use super::info::InfoCookie;
use super::matcher::RedirectMatcher;
use super::settings::RedirectSettings;
use super::uri::{absolute_url, login_url, logout_url, redirect_uri};
use super::value::{RedirectValue, query_value, strip_auth_params};
use crate::AuthResult;
use crate::clock::{Clock, SystemClock};
use crate::error::AuthError;
use crate::oauth2::{DEFAULT_HTTP_TIMEOUT, TokenClient, TokenEndpoint};
use crate::provider::Provider;
use crate::store::{
    ResponseCookies, SessionRegistry, SessionStore, TokenRecord, read_cookie,
    replace_request_cookie,
};
use crate::token::{decode_unverified, is_refresh_need};

/// Session key holding the token envelope.
pub const SESSION_TOKEN_KEY: &str = "cookie";
/// Session key holding the Redirect Value.
pub const SESSION_REDIRECT_KEY: &str = "redirect";
/// Suffix of the cookie (or session) name holding the Redirect Value.
pub const REDIRECT_SUFFIX: &str = "_redirect";

/// Request extension carrying the access token from the persisted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken(pub String);

/// Request extension that makes the engine let the request through
/// untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipRedirect;

/// Decides whether a request comes from a browser.
pub type AgentPredicate = Arc<dyn Fn(&HeaderMap) -> bool + Send + Sync>;

/// What the caller should do with the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    /// Continue to the handler. `record` is the persisted token, already
    /// refreshed when a refresh happened.
    Proceed {
        /// Persisted token record, if any.
        record: Option<TokenRecord>,
    },
    /// Answer with `307 Temporary Redirect` to `location`.
    Redirect {
        /// Redirect target.
        location: String,
    },
    /// Answer with `401 Unauthorized`.
    Unauthorized,
}

impl FlowOutcome {
    fn proceed() -> Self {
        Self::Proceed { record: None }
    }
}

/// Builder for [`RedirectEngine`].
pub struct RedirectEngineBuilder {
    provider: Arc<dyn Provider>,
    settings: RedirectSettings,
    registry: Option<Arc<SessionRegistry>>,
    http: Option<reqwest::Client>,
    http_timeout: Duration,
    clock: Option<Arc<dyn Clock>>,
    agent: Option<AgentPredicate>,
}

impl RedirectEngineBuilder {
    /// Session stores to pick `settings.session_store` from.
    #[must_use]
    pub fn session_registry(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// HTTP client for token endpoint calls.
    #[must_use]
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    /// Token endpoint timeout when no client is injected (default: 30 s).
    #[must_use]
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Time source for the refresh check.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replaces the user-agent check used with `check_agent`.
    #[must_use]
    pub fn agent_predicate(mut self, predicate: AgentPredicate) -> Self {
        self.agent = Some(predicate);
        self
    }

    /// Builds the engine.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if a regex is invalid, the provider has no
    /// token URL, `use_session` is set without a registered store, or the
    /// HTTP client cannot be built.
    pub fn build(self) -> AuthResult<RedirectEngine> {
        let Self {
            provider,
            settings,
            registry,
            http,
            http_timeout,
            clock,
            agent,
        } = self;

        settings.validate()?;

        let sessions = if settings.use_session {
            let registry = registry.ok_or_else(|| {
                AuthError::configuration("use_session requires a session registry")
            })?;
            let store = registry.get(&settings.session_store).ok_or_else(|| {
                AuthError::configuration(format!(
                    "session store '{}' is not registered",
                    settings.session_store
                ))
            })?;
            Some(store)
        } else {
            None
        };

        let token_url = provider
            .token_url()
            .ok_or_else(|| AuthError::configuration("token url empty"))?;
        let endpoint = TokenEndpoint::new(token_url, provider.client_id_external())
            .with_client_secret(provider.client_secret_external())
            .with_scopes(provider.scopes().to_vec());

        let callback_modify = settings
            .callback_modify
            .iter()
            .map(|rule| Ok((rule.compile()?, rule.replacement.clone())))
            .collect::<AuthResult<Vec<_>>>()?;

        let agent = agent.unwrap_or_else(|| {
            let needle = settings.check_agent_contains.clone();
            Arc::new(move |headers: &HeaderMap| {
                headers
                    .get(USER_AGENT)
                    .and_then(|v| v.to_str().ok())
                    .is_some_and(|ua| ua.contains(needle.as_str()))
            })
        });

        let client = match http {
            Some(http) => TokenClient::new(http),
            None => TokenClient::with_timeout(http_timeout)?,
        };

        let cookie_name = settings.cookie_name_for(provider.client_id_external());
        tracing::debug!(
            provider = provider.name(),
            cookie = %cookie_name,
            use_session = settings.use_session,
            "Redirect engine configured"
        );

        Ok(RedirectEngine {
            redirect_name: format!("{cookie_name}{REDIRECT_SUFFIX}"),
            cookie_name,
            matcher: RedirectMatcher::new(&settings.redirect_match)?,
            callback_modify,
            client,
            endpoint,
            sessions,
            agent,
            clock: clock.unwrap_or_else(|| Arc::new(SystemClock)),
            provider,
            settings,
        })
    }
}

/// Drives the browser authorization-code flow for one provider.
///
/// States: no credential, redirected, code received, authenticated, near
/// expiry, refreshed. [`handle`](Self::handle) runs once per request before
/// token verification; [`on_verification_failure`](Self::on_verification_failure)
/// runs when verification rejects the token.
pub struct RedirectEngine {
    provider: Arc<dyn Provider>,
    settings: RedirectSettings,
    cookie_name: String,
    redirect_name: String,
    client: TokenClient,
    endpoint: TokenEndpoint,
    sessions: Option<Arc<dyn SessionStore>>,
    matcher: RedirectMatcher,
    callback_modify: Vec<(Regex, String)>,
    agent: AgentPredicate,
    clock: Arc<dyn Clock>,
}

impl RedirectEngine {
    /// Starts building an engine.
    #[must_use]
    pub fn builder(provider: Arc<dyn Provider>, settings: RedirectSettings) -> RedirectEngineBuilder {
        RedirectEngineBuilder {
            provider,
            settings,
            registry: None,
            http: None,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            clock: None,
            agent: None,
        }
    }

    /// Name of the token cookie (or session).
    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Name of the Redirect Value cookie (or session).
    #[must_use]
    pub fn redirect_name(&self) -> &str {
        &self.redirect_name
    }

    /// Engine settings.
    #[must_use]
    pub fn settings(&self) -> &RedirectSettings {
        &self.settings
    }

    /// Runs the flow for one request.
    ///
    /// With the noop provider every request proceeds untouched.
    ///
    /// The request may be modified: an [`AccessToken`] extension is added,
    /// `Authorization` is set with `token_header`, and the `Cookie` header
    /// is rewritten after a refresh. Cookies to send back are collected in
    /// `cookies`.
    ///
    /// # Errors
    ///
    /// - `TokenExchange` if the code exchange fails
    /// - `Configuration` for unusable provider URLs or `base_url`
    /// - `Storage` if the session store fails
    pub async fn handle(
        &self,
        parts: &mut Parts,
        cookies: &mut ResponseCookies,
    ) -> AuthResult<FlowOutcome> {
        if self.provider.is_noop() {
            return Ok(FlowOutcome::proceed());
        }

        if let Some(logout_path) = self.settings.logout.path.as_deref()
            && !logout_path.is_empty()
            && parts.uri.path() == logout_path
        {
            return self.logout(parts, cookies).await;
        }

        if parts.extensions.get::<SkipRedirect>().is_some() {
            tracing::trace!("Redirect flow skipped by request extension");
            return Ok(FlowOutcome::proceed());
        }

        if !self.is_browser(&parts.headers) {
            tracing::trace!("Not a browser, skipping redirect flow");
            return Ok(FlowOutcome::proceed());
        }

        if parts.headers.contains_key(AUTHORIZATION) {
            tracing::trace!("Authorization header present");
            return Ok(FlowOutcome::proceed());
        }

        if let Some(record) = self.load_record(&parts.headers).await {
            return Ok(self.authenticated(parts, cookies, record).await);
        }

        if let Some(code) = query_value(parts.uri.query(), "code")
            && let Some(outcome) = self.exchange(parts, cookies, &code).await?
        {
            return Ok(outcome);
        }

        if self.settings.disable_redirect || !self.matcher.is_redirectable(parts) {
            return Ok(FlowOutcome::proceed());
        }

        self.login_redirect(parts, cookies).await
    }

    /// Reacts to a token the verifier rejected.
    ///
    /// Key-id errors always clear the persisted token. Browser requests that
    /// may be redirected get a fresh login redirect; everything else is
    /// unauthorized.
    ///
    /// # Errors
    ///
    /// See [`handle`](Self::handle).
    pub async fn on_verification_failure(
        &self,
        parts: &mut Parts,
        error: &AuthError,
        cookies: &mut ResponseCookies,
    ) -> AuthResult<FlowOutcome> {
        tracing::debug!(error = %error, category = %error.category(), "Token verification failed");

        if self.provider.is_noop() {
            return Ok(FlowOutcome::Unauthorized);
        }

        let key_id_error = error.is_key_id_error();
        if key_id_error {
            self.clear_token(&parts.headers, cookies).await;
        }

        if self.settings.disable_redirect
            || parts.extensions.get::<SkipRedirect>().is_some()
            || !self.is_browser(&parts.headers)
            || !self.matcher.is_redirectable(parts)
        {
            return Ok(FlowOutcome::Unauthorized);
        }

        if !key_id_error {
            self.clear_token(&parts.headers, cookies).await;
        }

        self.login_redirect(parts, cookies).await
    }

    fn is_browser(&self, headers: &HeaderMap) -> bool {
        !self.settings.check_agent || (self.agent)(headers)
    }

    async fn authenticated(
        &self,
        parts: &mut Parts,
        cookies: &mut ResponseCookies,
        mut record: TokenRecord,
    ) -> FlowOutcome {
        if self.settings.refresh_token {
            match is_refresh_need(
                &record.access_token,
                self.clock.now_unix(),
                self.settings.refresh_lookahead,
            ) {
                Ok(true) => match self.refresh(parts, cookies, &record).await {
                    Ok(refreshed) => {
                        tracing::debug!("Access token refreshed");
                        record = refreshed;
                    }
                    Err(e) => tracing::debug!(error = %e, "Token refresh failed, using stale token"),
                },
                Ok(false) => {}
                Err(e) => tracing::debug!(error = %e, "Cannot check access token expiry"),
            }
        }

        parts
            .extensions
            .insert(AccessToken(record.access_token.clone()));

        if self.settings.token_header {
            match HeaderValue::from_str(&format!("Bearer {}", record.access_token)) {
                Ok(value) => {
                    parts.headers.insert(AUTHORIZATION, value);
                }
                Err(_) => tracing::warn!("Access token is not a valid header value"),
            }
        }

        FlowOutcome::Proceed {
            record: Some(record),
        }
    }

    async fn refresh(
        &self,
        parts: &mut Parts,
        cookies: &mut ResponseCookies,
        record: &TokenRecord,
    ) -> AuthResult<TokenRecord> {
        if record.refresh_token.is_empty() {
            return Err(AuthError::token_exchange("no refresh token"));
        }

        let refreshed = self
            .client
            .refresh_token(&self.endpoint, &record.refresh_token)
            .await?;
        let envelope = refreshed.encode_envelope()?;

        self.write_info(cookies, &refreshed.access_token);

        match &self.sessions {
            Some(_) => {
                if let Err(e) = self
                    .save_value(
                        &parts.headers,
                        &self.cookie_name,
                        SESSION_TOKEN_KEY,
                        &envelope,
                        cookies,
                    )
                    .await
                {
                    tracing::warn!(error = %e, "Failed to save refreshed token in session");
                }
            }
            None => {
                cookies.add(self.settings.cookie.build(&self.cookie_name, &envelope));
                replace_request_cookie(&mut parts.headers, &self.cookie_name, &envelope);
            }
        }

        Ok(refreshed)
    }

    /// Returns `Ok(None)` when the callback state does not match.
    async fn exchange(
        &self,
        parts: &mut Parts,
        cookies: &mut ResponseCookies,
        code: &str,
    ) -> AuthResult<Option<FlowOutcome>> {
        let callback_state = query_value(parts.uri.query(), "state");
        let stored = self.load_redirect(&parts.headers).await;

        let stored = match stored {
            Some(value) if callback_state.as_deref() == Some(value.state.as_str()) => value,
            other => {
                tracing::warn!(
                    stored = other.is_some(),
                    error = %AuthError::RedirectStateMismatch,
                    "Restarting login"
                );
                self.remove_logged(&parts.headers, &self.redirect_name, cookies)
                    .await;
                return Ok(None);
            }
        };

        // a state is good for one exchange attempt
        self.remove_logged(&parts.headers, &self.redirect_name, cookies)
            .await;

        let query = strip_auth_params(parts.uri.query().unwrap_or_default());
        let redirect_uri = redirect_uri(
            parts,
            self.settings.callback.as_deref(),
            self.settings.base_url.as_deref(),
            &self.settings.schema,
        )?;

        let record = self
            .client
            .authorization_code(&self.endpoint, code, &redirect_uri)
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Authorization code exchange failed"))?;

        let envelope = record.encode_envelope()?;
        self.save_value(
            &parts.headers,
            &self.cookie_name,
            SESSION_TOKEN_KEY,
            &envelope,
            cookies,
        )
        .await?;
        self.write_info(cookies, &record.access_token);

        let location = self.landing(parts.uri.path(), &query, &stored);

        tracing::debug!(location = %location, "Login completed");
        Ok(Some(FlowOutcome::Redirect { location }))
    }

    /// Clean URL the browser lands on after the code exchange.
    fn landing(&self, path: &str, stripped_query: &str, stored: &RedirectValue) -> String {
        let query = if self.settings.callback_set {
            stored.query.clone()
        } else {
            [stripped_query, stored.query.as_str()]
                .into_iter()
                .filter(|q| !q.is_empty())
                .collect::<Vec<_>>()
                .join("&")
        };

        let mut path = match (&stored.path, self.settings.callback_set) {
            (Some(original), true) => original.clone(),
            _ => path.to_string(),
        };

        for (regex, replacement) in &self.callback_modify {
            let modified = regex.replace_all(&path, replacement.as_str()).into_owned();
            if modified != path {
                path = modified;
                break;
            }
        }

        if query.is_empty() {
            path
        } else {
            format!("{path}?{query}")
        }
    }

    async fn login_redirect(
        &self,
        parts: &Parts,
        cookies: &mut ResponseCookies,
    ) -> AuthResult<FlowOutcome> {
        let value = RedirectValue::capture(
            parts.uri.path(),
            parts.uri.query(),
            self.settings.callback_set,
        );
        self.save_value(
            &parts.headers,
            &self.redirect_name,
            SESSION_REDIRECT_KEY,
            &value.encode()?,
            cookies,
        )
        .await?;

        let redirect_uri = redirect_uri(
            parts,
            self.settings.callback.as_deref(),
            self.settings.base_url.as_deref(),
            &self.settings.schema,
        )?;
        let auth_url = self
            .provider
            .auth_url_external()
            .ok_or_else(|| AuthError::configuration("auth url empty"))?;

        let location = login_url(
            auth_url,
            self.provider.client_id_external(),
            self.provider.scopes(),
            &value.state,
            &redirect_uri,
        )?;

        tracing::debug!(path = parts.uri.path(), "Redirecting to login");
        Ok(FlowOutcome::Redirect { location })
    }

    async fn logout(
        &self,
        parts: &Parts,
        cookies: &mut ResponseCookies,
    ) -> AuthResult<FlowOutcome> {
        let id_token = self
            .load_record(&parts.headers)
            .await
            .and_then(|record| record.id_token().map(str::to_string));

        let target = match self.settings.logout.redirect.as_deref() {
            Some(target) if !target.is_empty() => target.to_string(),
            _ => absolute_url(
                parts,
                "/",
                self.settings.base_url.as_deref(),
                &self.settings.schema,
            )?,
        };

        let endpoint = self
            .provider
            .logout_url_external()
            .ok_or_else(|| AuthError::configuration("logout url empty"))?;
        let location = logout_url(endpoint, id_token.as_deref(), &target)?;

        self.clear_token(&parts.headers, cookies).await;
        self.remove_logged(&parts.headers, &self.redirect_name, cookies)
            .await;
        if let Some(info) = self.info_cookie_name() {
            cookies.add(self.settings.cookie.removal(info));
        }

        tracing::debug!(id_token_hint = id_token.is_some(), "Logging out");
        Ok(FlowOutcome::Redirect { location })
    }

    fn info_cookie_name(&self) -> Option<&str> {
        self.settings
            .information
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
    }

    fn write_info(&self, cookies: &mut ResponseCookies, access_token: &str) {
        let Some(name) = self.info_cookie_name() else {
            return;
        };

        match decode_unverified(access_token) {
            Ok(claims) => {
                let info = InfoCookie::from_claims(&claims, &self.settings.information);
                // read by front-end scripts
                let mut cookie = self.settings.cookie.build(name, &info.to_json());
                cookie.set_http_only(false);
                cookies.add(cookie);
            }
            Err(e) => tracing::debug!(error = %e, "Skipping information cookie"),
        }
    }

    async fn clear_token(&self, headers: &HeaderMap, cookies: &mut ResponseCookies) {
        self.remove_logged(headers, &self.cookie_name, cookies).await;
    }

    async fn load_record(&self, headers: &HeaderMap) -> Option<TokenRecord> {
        let envelope = self
            .load_value(headers, &self.cookie_name, SESSION_TOKEN_KEY)
            .await?;
        TokenRecord::decode_envelope(&envelope)
            .inspect_err(|e| tracing::debug!(error = %e, "Ignoring unreadable token envelope"))
            .ok()
    }

    async fn load_redirect(&self, headers: &HeaderMap) -> Option<RedirectValue> {
        let value = self
            .load_value(headers, &self.redirect_name, SESSION_REDIRECT_KEY)
            .await?;
        RedirectValue::decode(&value)
            .inspect_err(|e| tracing::debug!(error = %e, "Ignoring unreadable redirect value"))
            .ok()
    }

    async fn load_value(&self, headers: &HeaderMap, name: &str, key: &str) -> Option<String> {
        match &self.sessions {
            Some(store) => match store.load(headers, name).await {
                Ok(session) if !session.is_new => session.get(key).map(str::to_string),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!(error = %e, session = name, "Failed to load session");
                    None
                }
            },
            None => read_cookie(headers, name).filter(|v| !v.is_empty()),
        }
    }

    async fn save_value(
        &self,
        headers: &HeaderMap,
        name: &str,
        key: &str,
        value: &str,
        cookies: &mut ResponseCookies,
    ) -> AuthResult<()> {
        match &self.sessions {
            Some(store) => {
                let mut session = store.load(headers, name).await?;
                session.insert(key, value);
                store.save(&session, cookies).await
            }
            None => {
                cookies.add(self.settings.cookie.build(name, value));
                Ok(())
            }
        }
    }

    async fn remove_logged(&self, headers: &HeaderMap, name: &str, cookies: &mut ResponseCookies) {
        match &self.sessions {
            Some(store) => {
                if let Err(e) = store.remove(headers, name, cookies).await {
                    tracing::warn!(error = %e, session = name, "Failed to remove session");
                }
            }
            None => cookies.add(self.settings.cookie.removal(name)),
        }
    }
}

impl fmt::Debug for RedirectEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedirectEngine")
            .field("provider", &self.provider.name())
            .field("cookie_name", &self.cookie_name)
            .field("use_session", &self.sessions.is_some())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

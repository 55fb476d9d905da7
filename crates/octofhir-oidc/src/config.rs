//! Configuration.
//!
//! [`OidcConfig`] is deserialized from TOML and environment variables by
//! [`loader::load_config`]. Every section has documented defaults, so an
//! empty file plus `OCTOFHIR_OIDC__PROVIDER__ACTIVE=noop` is a valid setup.
//!
//! ```toml
//! [provider]
//! active = "keycloak"
//!
//! [provider.keycloak]
//! base_url = "https://sso.example.com"
//! realm = "main"
//! client_id = "orders"
//!
//! [jwks]
//! refresh_interval = "5m"
//!
//! [redirect]
//! callback = "/auth/callback"
//! refresh_token = true
//! ```

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};

use crate::AuthResult;
use crate::error::AuthError;
use crate::jwks::{GivenKeys, JwksOptions};
use crate::middleware::{Authenticator, ClaimsHeaders, Skipper};
use crate::provider::{Provider, ProvidersConfig};
use crate::redirect::{RedirectEngine, RedirectSettings};
use crate::store::SessionRegistry;
use crate::token::{ParserOptions, TokenParser};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OidcConfig {
    /// Identity providers.
    pub provider: ProvidersConfig,

    /// Remote key set caching.
    pub jwks: JwksConfig,

    /// Token verification.
    pub parser: ParserConfig,

    /// Outbound HTTP.
    pub http: HttpConfig,

    /// Browser redirect flow. Disabled when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<RedirectSettings>,

    /// Paths that bypass authentication.
    pub skipper: Skipper,

    /// Claims forwarded as request headers. Disabled when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claims_headers: Option<ClaimsHeaders>,
}

/// Remote key set settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwksConfig {
    /// Background refresh interval.
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,

    /// Upper bound for a refresh triggered by an unknown kid.
    #[serde(with = "humantime_serde")]
    pub refresh_timeout: Duration,

    /// Minimum time between unknown-kid refreshes.
    #[serde(with = "humantime_serde")]
    pub refresh_rate_limit: Duration,

    /// Refresh once on an unknown kid.
    pub refresh_unknown_kid: bool,

    /// Allow plain `http://` certificate URLs.
    pub allow_http: bool,
}

impl Default for JwksConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(300),  // 5 minutes
            refresh_timeout: Duration::from_secs(10),    // 10 seconds
            refresh_rate_limit: Duration::from_secs(60), // 1 minute
            refresh_unknown_kid: true,
            allow_http: false,
        }
    }
}

impl JwksConfig {
    /// Key set options using `client` for fetches.
    #[must_use]
    pub fn to_options(&self, client: reqwest::Client) -> JwksOptions {
        JwksOptions::new()
            .with_refresh_interval(self.refresh_interval)
            .with_refresh_timeout(self.refresh_timeout)
            .with_refresh_rate_limit(self.refresh_rate_limit)
            .with_refresh_unknown_kid(self.refresh_unknown_kid)
            .with_allow_http(self.allow_http)
            .with_client(client)
    }
}

/// Token verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Accepted signature algorithms, e.g. `RS256`.
    pub algorithms: Vec<String>,

    /// Clock skew tolerance for `exp` and `nbf`.
    #[serde(with = "humantime_serde")]
    pub leeway: Duration,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            algorithms: vec!["RS256".to_string()],
            leeway: Duration::ZERO,
        }
    }
}

impl ParserConfig {
    /// Parsed algorithm list.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for an unknown algorithm name.
    pub fn algorithms(&self) -> Result<Vec<Algorithm>, ConfigError> {
        self.algorithms
            .iter()
            .map(|name| {
                Algorithm::from_str(name).map_err(|_| {
                    ConfigError::InvalidValue(format!("parser.algorithms: unknown algorithm '{name}'"))
                })
            })
            .collect()
    }

    /// Parser options using `client` for introspection.
    ///
    /// # Errors
    ///
    /// See [`algorithms`](Self::algorithms).
    pub fn to_options(&self, client: reqwest::Client) -> Result<ParserOptions, ConfigError> {
        Ok(ParserOptions::new()
            .with_algorithms(self.algorithms()?)
            .with_leeway(self.leeway)
            .with_client(client))
    }
}

/// Outbound HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout for JWKS, introspection and token calls.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// `User-Agent` header.
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30), // 30 seconds
            user_agent: concat!("octofhir-oidc/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpConfig {
    /// Builds the shared HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the client cannot be built.
    pub fn build_client(&self) -> AuthResult<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.clone())
            .build()
            .map_err(|e| AuthError::configuration(format!("http client: {e}")))
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),

    /// Sources could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(String),
}

impl From<ConfigError> for AuthError {
    fn from(err: ConfigError) -> Self {
        AuthError::configuration(err.to_string())
    }
}

impl OidcConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - `jwks.refresh_interval`, `jwks.refresh_timeout` or `http.timeout` is zero
    /// - `parser.algorithms` is empty or names an unknown algorithm
    /// - a redirect regex does not compile
    ///
    /// Returns `ConfigError::Missing` if no provider is configured and the
    /// active provider is not `noop`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwks.refresh_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "jwks.refresh_interval must be > 0".into(),
            ));
        }
        if self.jwks.refresh_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "jwks.refresh_timeout must be > 0".into(),
            ));
        }
        if self.http.timeout.is_zero() {
            return Err(ConfigError::InvalidValue("http.timeout must be > 0".into()));
        }

        if self.parser.algorithms.is_empty() {
            return Err(ConfigError::InvalidValue(
                "parser.algorithms must not be empty".into(),
            ));
        }
        self.parser.algorithms()?;

        if let Some(redirect) = &self.redirect {
            redirect
                .validate()
                .map_err(|e| ConfigError::InvalidValue(format!("redirect: {e}")))?;
        }

        if !self.provider.is_noop() {
            self.provider.active_provider().map_err(|e| match e {
                AuthError::Configuration { message } => ConfigError::Missing(message),
                other => ConfigError::InvalidValue(other.to_string()),
            })?;
        }

        Ok(())
    }

    /// The active provider.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the active provider is not configured.
    pub fn active_provider(&self) -> AuthResult<Arc<dyn Provider>> {
        self.provider.active_provider()
    }

    /// Builds the token parser for the active provider.
    ///
    /// `given` keys are trusted in addition to the provider's key set.
    ///
    /// # Errors
    ///
    /// - `Configuration` for an invalid setup
    /// - `KeyFetch` if the initial key set fetch fails
    pub async fn build_parser(&self, given: GivenKeys) -> AuthResult<TokenParser> {
        let client = self.http.build_client()?;
        TokenParser::from_provider(
            self.active_provider()?,
            self.jwks.to_options(client.clone()),
            given,
            self.parser.to_options(client)?,
        )
        .await
    }

    /// Builds the redirect engine, if the redirect flow is configured.
    ///
    /// The noop provider never gets an engine, so a leftover `redirect`
    /// section does not turn authentication back on.
    ///
    /// # Errors
    ///
    /// See [`RedirectEngineBuilder::build`](crate::redirect::RedirectEngineBuilder::build).
    pub fn build_engine(
        &self,
        sessions: Option<Arc<SessionRegistry>>,
    ) -> AuthResult<Option<RedirectEngine>> {
        let Some(settings) = &self.redirect else {
            return Ok(None);
        };

        let provider = self.active_provider()?;
        if provider.is_noop() {
            tracing::debug!("Noop provider, redirect flow disabled");
            return Ok(None);
        }

        let mut builder = RedirectEngine::builder(provider, settings.clone())
            .http_client(self.http.build_client()?);
        if let Some(sessions) = sessions {
            builder = builder.session_registry(sessions);
        }
        builder.build().map(Some)
    }

    /// Builds the full [`Authenticator`].
    ///
    /// # Errors
    ///
    /// See [`build_parser`](Self::build_parser) and
    /// [`build_engine`](Self::build_engine).
    pub async fn build_authenticator(
        &self,
        given: GivenKeys,
        sessions: Option<Arc<SessionRegistry>>,
    ) -> AuthResult<Authenticator> {
        self.validate()?;

        let mut authenticator =
            Authenticator::new(self.build_parser(given).await?).with_skipper(self.skipper.clone());
        if let Some(engine) = self.build_engine(sessions)? {
            authenticator = authenticator.with_engine(engine);
        }
        if let Some(headers) = &self.claims_headers {
            authenticator = authenticator.with_claims_headers(headers.clone());
        }

        tracing::info!(
            provider = self.active_provider()?.name(),
            redirect = authenticator.engine().is_some(),
            "Authenticator configured"
        );
        Ok(authenticator)
    }
}

pub mod loader {
    use std::path::{Path, PathBuf};

    use config::{Config, Environment, File};

    use super::{ConfigError, OidcConfig};

    /// Environment variable prefix, e.g. `OCTOFHIR_OIDC__PROVIDER__ACTIVE`.
    pub const ENV_PREFIX: &str = "OCTOFHIR_OIDC";

    /// Default file name looked up in the working directory.
    pub const DEFAULT_FILE: &str = "octofhir-oidc.toml";

    /// Loads and validates the configuration.
    ///
    /// Sources, later ones winning:
    /// 1. `path` (or [`DEFAULT_FILE`]), if it exists
    /// 2. environment variables with the [`ENV_PREFIX`] prefix and `__`
    ///    separator
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Load` if a source cannot be read or deserialized
    /// and any [`OidcConfig::validate`] error.
    pub fn load_config(path: Option<&Path>) -> Result<OidcConfig, ConfigError> {
        let file = path.map_or_else(|| PathBuf::from(DEFAULT_FILE), Path::to_path_buf);

        let mut builder = Config::builder();
        if file.exists() {
            builder = builder.add_source(File::from(file));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("parser.algorithms")
                .try_parsing(true),
        );

        let cfg = builder
            .build()
            .map_err(|e| ConfigError::Load(format!("config build error: {e}")))?;
        let merged: OidcConfig = cfg
            .try_deserialize()
            .map_err(|e| ConfigError::Load(format!("config deserialize error: {e}")))?;

        merged.validate()?;
        Ok(merged)
    }
}

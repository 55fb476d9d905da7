//! Redirect flow settings.

use std::collections::HashMap;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::AuthResult;
use crate::error::AuthError;
use crate::store::CookieSettings;
use crate::token::DEFAULT_REFRESH_LOOKAHEAD;

/// Default path pattern for redirectable requests: extension-less paths and
/// `.html` pages.
pub const DEFAULT_REDIRECT_PATH_REGEX: &str = r"^(/[^.]*(\.html)?|/?)$";

/// Settings of the browser login flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedirectSettings {
    /// Name of the token cookie (or session). Default: `auth_<client id>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie_name: Option<String>,

    /// Attributes of every cookie the flow writes.
    pub cookie: CookieSettings,

    /// Callback path registered at the provider. Default: the request path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,

    /// Restore the originally requested path after login.
    pub callback_set: bool,

    /// Rewrites applied to the landing path after login; the first
    /// matching rule wins.
    pub callback_modify: Vec<RegexPath>,

    /// Overrides scheme and host of the reconstructed redirect URI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Scheme used with the `Host` header (default: `https`).
    pub schema: String,

    /// Keep tokens in a server-side session instead of cookies.
    pub use_session: bool,

    /// Registry name of the session store used with `use_session`.
    pub session_store: String,

    /// Set `Authorization: Bearer` on the request from the persisted token.
    pub token_header: bool,

    /// Refresh tokens that are about to expire.
    pub refresh_token: bool,

    /// How long before expiry a token is refreshed (default: 10 seconds).
    #[serde(with = "humantime_serde")]
    pub refresh_lookahead: Duration,

    /// Only browsers take part in the flow.
    pub check_agent: bool,

    /// User-agent substring that identifies a browser (default: `Mozilla`).
    pub check_agent_contains: String,

    /// Never answer with a login redirect; unauthenticated requests get 401.
    pub disable_redirect: bool,

    /// Logout endpoint settings.
    pub logout: LogoutSettings,

    /// Side-channel information cookie.
    pub information: InfoSettings,

    /// Which requests may be answered with a login redirect.
    pub redirect_match: RedirectMatch,
}

impl Default for RedirectSettings {
    fn default() -> Self {
        Self {
            cookie_name: None,
            cookie: CookieSettings::default(),
            callback: None,
            callback_set: false,
            callback_modify: Vec::new(),
            base_url: None,
            schema: "https".to_string(),
            use_session: false,
            session_store: "default".to_string(),
            token_header: false,
            refresh_token: false,
            refresh_lookahead: DEFAULT_REFRESH_LOOKAHEAD,
            check_agent: false,
            check_agent_contains: "Mozilla".to_string(),
            disable_redirect: false,
            logout: LogoutSettings::default(),
            information: InfoSettings::default(),
            redirect_match: RedirectMatch::default(),
        }
    }
}

impl RedirectSettings {
    /// Returns the token cookie name for `client_id`.
    #[must_use]
    pub fn cookie_name_for(&self, client_id: &str) -> String {
        match self.cookie_name.as_deref().filter(|n| !n.is_empty()) {
            Some(name) => name.to_string(),
            None => format!("auth_{client_id}"),
        }
    }

    /// Checks every regular expression.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` naming the first invalid pattern.
    pub fn validate(&self) -> AuthResult<()> {
        for rule in &self.callback_modify {
            rule.compile()?;
        }
        self.redirect_match.compile_regex()?;
        Ok(())
    }
}

/// One landing-path rewrite.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegexPath {
    /// Pattern matched against the path.
    pub regex: String,
    /// Replacement, with `$1`-style group references.
    pub replacement: String,
}

impl RegexPath {
    /// Creates a rewrite rule.
    #[must_use]
    pub fn new(regex: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            regex: regex.into(),
            replacement: replacement.into(),
        }
    }

    pub(crate) fn compile(&self) -> AuthResult<Regex> {
        Regex::new(&self.regex).map_err(|e| {
            AuthError::configuration(format!("invalid callback_modify regex '{}': {e}", self.regex))
        })
    }
}

/// Logout endpoint settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogoutSettings {
    /// Request path that triggers logout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// `post_logout_redirect_uri`. Default: the reconstructed base URL with
    /// path `/`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

/// Contents of the side-channel information cookie.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfoSettings {
    /// Cookie name. The cookie is only written when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Include the role set.
    pub roles: bool,
    /// Include the scopes.
    pub scopes: bool,
    /// Raw claims to copy by name.
    pub map: Vec<String>,
    /// Static values copied as-is.
    pub custom: Map<String, Value>,
}

/// Rules deciding whether an unauthenticated request gets a login redirect.
///
/// `None` fields fall back to the defaults; an explicitly empty list or
/// map disables that rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedirectMatch {
    /// Header/value pairs that mark a request as non-redirectable.
    /// Default: `X-Requested-With: XMLHttpRequest`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_header_key_values: Option<HashMap<String, String>>,

    /// Headers whose presence marks a request as non-redirectable.
    /// Default: `Content-Type`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_header_keys: Option<Vec<String>>,

    /// Pattern the path must match. Default:
    /// [`DEFAULT_REDIRECT_PATH_REGEX`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

impl RedirectMatch {
    pub(crate) fn compile_regex(&self) -> AuthResult<Regex> {
        let pattern = self
            .regex
            .as_deref()
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REDIRECT_PATH_REGEX);
        Regex::new(pattern).map_err(|e| {
            AuthError::configuration(format!("invalid redirect_match regex '{pattern}': {e}"))
        })
    }
}

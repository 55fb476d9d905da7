//! Redirect Value: CSRF state and continuation for a pending login.

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::AuthResult;
use crate::error::AuthError;
use crate::store::new_state;

/// Query parameters that belong to the authorization response.
pub const AUTH_QUERY_PARAMS: [&str; 3] = ["code", "state", "session_state"];

/// State persisted between the login redirect and the callback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectValue {
    /// Originally requested path, kept only with path restoration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Authorization parameters of the original request, form-encoded.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub query: String,
    /// CSRF state sent to the provider.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state: String,
}

impl RedirectValue {
    /// Captures the request path and query with a fresh state token.
    #[must_use]
    pub fn capture(path: &str, query: Option<&str>, keep_path: bool) -> Self {
        Self {
            path: keep_path.then(|| path.to_string()),
            query: auth_params(query.unwrap_or_default()),
            state: new_state(),
        }
    }

    /// Encodes the value as base64 (standard alphabet) JSON.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if serialization fails.
    pub fn encode(&self) -> AuthResult<String> {
        let json = serde_json::to_vec(self)
            .map_err(|e| AuthError::internal(format!("redirect value serialization: {e}")))?;
        Ok(STANDARD.encode(json))
    }

    /// Decodes a value from its base64 JSON form.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the value is not valid base64 or JSON.
    pub fn decode(value: &str) -> AuthResult<Self> {
        let json = STANDARD
            .decode(value)
            .map_err(|e| AuthError::storage(format!("redirect value base64 decode: {e}")))?;
        serde_json::from_slice(&json)
            .map_err(|e| AuthError::storage(format!("redirect value json decode: {e}")))
    }
}

/// Keeps only `code`, `state` and `session_state` from `query`.
#[must_use]
pub fn auth_params(query: &str) -> String {
    let mut out = form_urlencoded::Serializer::new(String::new());
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        if AUTH_QUERY_PARAMS.contains(&&*key) {
            out.append_pair(&key, &value);
        }
    }
    out.finish()
}

/// Removes `code`, `state` and `session_state` from `query`.
#[must_use]
pub fn strip_auth_params(query: &str) -> String {
    let mut out = form_urlencoded::Serializer::new(String::new());
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        if !AUTH_QUERY_PARAMS.contains(&&*key) {
            out.append_pair(&key, &value);
        }
    }
    out.finish()
}

/// Returns the first value of `name` in `query`.
#[must_use]
pub fn query_value(query: Option<&str>, name: &str) -> Option<String> {
    form_urlencoded::parse(query.unwrap_or_default().as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

//! Token Record and its persisted envelope.

use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// OAuth2 token endpoint response, as persisted in the session envelope.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenRecord {
    /// Access token.
    pub access_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    /// Refresh token lifetime in seconds.
    pub refresh_expires_in: i64,
    /// Refresh token.
    pub refresh_token: String,
    /// Token type, usually `Bearer`.
    pub token_type: String,
    /// Keycloak not-before policy.
    #[serde(rename = "not-before-policy")]
    pub not_before_policy: i64,
    /// Provider session state.
    pub session_state: String,
    /// Granted scopes.
    pub scope: String,
    /// ID token, used as `id_token_hint` on logout.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id_token: String,
}

impl TokenRecord {
    /// Parses a token endpoint response body.
    ///
    /// # Errors
    ///
    /// Returns `TokenExchange` if the body is not a token response.
    pub fn from_response(body: &[u8]) -> Result<Self, AuthError> {
        let record: Self = serde_json::from_slice(body)
            .map_err(|e| AuthError::token_exchange(format!("malformed token response: {e}")))?;

        if record.access_token.is_empty() {
            return Err(AuthError::token_exchange(
                "token response has no access_token",
            ));
        }

        Ok(record)
    }

    /// Encodes the record as base64 (standard alphabet) JSON.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if serialization fails.
    pub fn encode_envelope(&self) -> Result<String, AuthError> {
        let json = serde_json::to_vec(self)
            .map_err(|e| AuthError::internal(format!("token record serialization: {e}")))?;
        Ok(STANDARD.encode(json))
    }

    /// Decodes a record from its base64 JSON envelope.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the envelope is not valid base64 or JSON.
    pub fn decode_envelope(value: &str) -> Result<Self, AuthError> {
        let json = STANDARD
            .decode(value)
            .map_err(|e| AuthError::storage(format!("envelope base64 decode: {e}")))?;
        serde_json::from_slice(&json)
            .map_err(|e| AuthError::storage(format!("envelope json decode: {e}")))
    }

    /// Returns the ID token if the provider issued one.
    #[must_use]
    pub fn id_token(&self) -> Option<&str> {
        (!self.id_token.is_empty()).then_some(self.id_token.as_str())
    }
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field("refresh_expires_in", &self.refresh_expires_in)
            .field("refresh_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("not_before_policy", &self.not_before_policy)
            .field("session_state", &self.session_state)
            .field("scope", &self.scope)
            .field("id_token", &(!self.id_token.is_empty()))
            .finish()
    }
}

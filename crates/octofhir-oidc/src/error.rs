//! Authentication error types.
//!
//! Every failure the core can produce is one [`AuthError`] variant. Token
//! verification failures share a single [`ErrorCategory::Token`] category so
//! callers only see "unauthorized", while the variant itself keeps the
//! distinguishing cause for logs and for the redirect engine.

use std::fmt;

/// Errors that can occur while verifying tokens or driving the login flow.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Provider or engine configuration is missing or invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// The key set endpoint was unreachable or returned a malformed document.
    #[error("Key fetch error: {message}")]
    KeyFetch {
        /// Description of the fetch failure.
        message: String,
    },

    /// The key set was fetched but does not contain the token's key id.
    #[error("Key id not found: {kid}")]
    KeyNotFound {
        /// The key id that could not be resolved.
        kid: String,
    },

    /// The resolved key does not match the token header (algorithm or key type).
    #[error("Key mismatch: {message}")]
    KeyMismatch {
        /// Description of the mismatch.
        message: String,
    },

    /// The token is malformed, expired, badly signed or inactive.
    #[error("Invalid token: {message}")]
    InvalidToken {
        /// Description of why the token is invalid.
        message: String,
    },

    /// The callback `state` did not match the persisted redirect value.
    #[error("Redirect state mismatch")]
    RedirectStateMismatch,

    /// The token endpoint rejected a code exchange or refresh.
    #[error("Token exchange failed: {message}")]
    TokenExchange {
        /// Raw response body or transport error.
        message: String,
    },

    /// The request lacks credentials.
    #[error("Unauthorized: {message}")]
    Unauthorized {
        /// Description of why the request is unauthorized.
        message: String,
    },

    /// The caller is authenticated but lacks a required role or scope.
    #[error("Forbidden: {message}")]
    Forbidden {
        /// Description of why access is forbidden.
        message: String,
    },

    /// Reading or writing a cookie or session entry failed.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `KeyFetch` error.
    #[must_use]
    pub fn key_fetch(message: impl Into<String>) -> Self {
        Self::KeyFetch {
            message: message.into(),
        }
    }

    /// Creates a new `KeyNotFound` error.
    #[must_use]
    pub fn key_not_found(kid: impl Into<String>) -> Self {
        Self::KeyNotFound { kid: kid.into() }
    }

    /// Creates a new `KeyMismatch` error.
    #[must_use]
    pub fn key_mismatch(message: impl Into<String>) -> Self {
        Self::KeyMismatch {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidToken` error.
    #[must_use]
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    /// Creates a new `TokenExchange` error.
    #[must_use]
    pub fn token_exchange(message: impl Into<String>) -> Self {
        Self::TokenExchange {
            message: message.into(),
        }
    }

    /// Creates a new `Unauthorized` error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Creates a new `Forbidden` error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` for errors caused by a key id that cannot be matched.
    ///
    /// A persisted cookie carrying such a token can never become valid again,
    /// so the redirect engine always clears it.
    #[must_use]
    pub fn is_key_id_error(&self) -> bool {
        matches!(self, Self::KeyNotFound { .. } | Self::KeyMismatch { .. })
    }

    /// Returns `true` if this error came out of token verification.
    #[must_use]
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidToken { .. }
                | Self::KeyNotFound { .. }
                | Self::KeyMismatch { .. }
                | Self::KeyFetch { .. }
        )
    }

    /// Returns `true` if retrying later may succeed without any change.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::KeyFetch { .. })
    }

    /// Returns `true` if this is a client error (4xx category).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::KeyNotFound { .. }
                | Self::KeyMismatch { .. }
                | Self::InvalidToken { .. }
                | Self::RedirectStateMismatch
                | Self::TokenExchange { .. }
                | Self::Unauthorized { .. }
                | Self::Forbidden { .. }
        )
    }

    /// Returns `true` if this is a server error (5xx category).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::Storage { .. } | Self::Internal { .. }
        )
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::KeyFetch { .. } => ErrorCategory::Token,
            Self::KeyNotFound { .. } => ErrorCategory::Token,
            Self::KeyMismatch { .. } => ErrorCategory::Token,
            Self::InvalidToken { .. } => ErrorCategory::Token,
            Self::RedirectStateMismatch => ErrorCategory::Redirect,
            Self::TokenExchange { .. } => ErrorCategory::Redirect,
            Self::Unauthorized { .. } => ErrorCategory::Authentication,
            Self::Forbidden { .. } => ErrorCategory::Authorization,
            Self::Storage { .. } => ErrorCategory::Infrastructure,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the OAuth 2.0 error code for this error.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::KeyFetch { .. }
            | Self::KeyNotFound { .. }
            | Self::KeyMismatch { .. }
            | Self::InvalidToken { .. } => "invalid_token",
            Self::RedirectStateMismatch => "invalid_request",
            Self::TokenExchange { .. } => "invalid_grant",
            Self::Unauthorized { .. } => "unauthorized",
            Self::Forbidden { .. } => "access_denied",
            Self::Configuration { .. } | Self::Storage { .. } | Self::Internal { .. } => {
                "server_error"
            }
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidKeyFormat => Self::key_mismatch(err.to_string()),
            ErrorKind::ExpiredSignature => Self::invalid_token("token expired"),
            ErrorKind::ImmatureSignature => Self::invalid_token("token not yet valid"),
            ErrorKind::InvalidSignature => Self::invalid_token("invalid signature"),
            _ => Self::invalid_token(err.to_string()),
        }
    }
}

/// Categories of authentication errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Token verification errors, reported to callers as "unauthorized".
    Token,
    /// Login flow errors (state mismatch, code exchange).
    Redirect,
    /// Missing credentials.
    Authentication,
    /// Permission checks.
    Authorization,
    /// Configuration errors.
    Configuration,
    /// Cookie/session storage errors.
    Infrastructure,
    /// Internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token => write!(f, "token"),
            Self::Redirect => write!(f, "redirect"),
            Self::Authentication => write!(f, "authentication"),
            Self::Authorization => write!(f, "authorization"),
            Self::Configuration => write!(f, "configuration"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthError::key_not_found("k1");
        assert_eq!(err.to_string(), "Key id not found: k1");

        let err = AuthError::token_exchange("{\"error\":\"invalid_grant\"}");
        assert_eq!(
            err.to_string(),
            "Token exchange failed: {\"error\":\"invalid_grant\"}"
        );

        let err = AuthError::RedirectStateMismatch;
        assert_eq!(err.to_string(), "Redirect state mismatch");
    }

    #[test]
    fn test_key_id_errors() {
        assert!(AuthError::key_not_found("k1").is_key_id_error());
        assert!(AuthError::key_mismatch("alg").is_key_id_error());
        assert!(!AuthError::invalid_token("expired").is_key_id_error());
        assert!(!AuthError::key_fetch("down").is_key_id_error());
    }

    #[test]
    fn test_token_errors_share_category() {
        for err in [
            AuthError::key_fetch("down"),
            AuthError::key_not_found("k1"),
            AuthError::key_mismatch("alg"),
            AuthError::invalid_token("expired"),
        ] {
            assert!(err.is_token_error());
            assert_eq!(err.category(), ErrorCategory::Token);
            assert_eq!(err.oauth_error_code(), "invalid_token");
        }
    }

    #[test]
    fn test_error_predicates() {
        assert!(AuthError::key_fetch("down").is_retryable());
        assert!(!AuthError::key_not_found("k1").is_retryable());

        let err = AuthError::configuration("token url empty");
        assert!(err.is_server_error());
        assert!(!err.is_client_error());

        let err = AuthError::forbidden("role not authorized");
        assert!(err.is_client_error());
        assert_eq!(err.category(), ErrorCategory::Authorization);
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::Token.to_string(), "token");
        assert_eq!(ErrorCategory::Redirect.to_string(), "redirect");
    }
}

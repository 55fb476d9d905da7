//! Error responses for the axum adapter.
//!
//! API clients get a terse OAuth-style JSON body. Verification failures and
//! server-side failures never echo their message.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::{AuthError, ErrorCategory};

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = status_code(&self);
        let code = self.oauth_error_code();
        let description = public_description(&self, status);

        let mut response = (
            status,
            Json(json!({
                "error": code,
                "error_description": description,
            })),
        )
            .into_response();

        if status == StatusCode::UNAUTHORIZED
            && let Ok(value) = HeaderValue::from_str(&www_authenticate(code, &description))
        {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, value);
        }

        response
    }
}

/// HTTP status for an error.
#[must_use]
pub fn status_code(error: &AuthError) -> StatusCode {
    match error.category() {
        ErrorCategory::Token | ErrorCategory::Redirect | ErrorCategory::Authentication => {
            StatusCode::UNAUTHORIZED
        }
        ErrorCategory::Authorization => StatusCode::FORBIDDEN,
        ErrorCategory::Configuration | ErrorCategory::Infrastructure | ErrorCategory::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Text safe to show the caller.
///
/// Key ids, algorithms, expiry reasons and key set URLs stay in the logs.
fn public_description(error: &AuthError, status: StatusCode) -> String {
    if status.is_server_error() {
        tracing::debug!(error = %error, "Hiding server error from response");
        return "internal error".to_string();
    }
    match error.category() {
        ErrorCategory::Token => {
            tracing::debug!(error = %error, "Token rejected");
            "invalid token".to_string()
        }
        ErrorCategory::Redirect => {
            tracing::debug!(error = %error, "Login flow failed");
            "authentication failed".to_string()
        }
        _ => error.to_string(),
    }
}

/// `Bearer error="..", error_description=".."`
fn www_authenticate(error: &str, description: &str) -> String {
    let escaped = description.replace('"', "\\\"");
    format!("Bearer error=\"{error}\", error_description=\"{escaped}\"")
}

//! Claims forwarded to upstream handlers as request headers.

use std::collections::BTreeMap;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::claims::Claims;

/// Header names for forwarded claims. An empty name disables that header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimsHeaders {
    /// Space-separated scopes.
    pub scopes: String,
    /// Space-separated roles.
    pub roles: String,
    /// Subject.
    pub user: String,
    /// Header name to string claim name.
    pub custom: BTreeMap<String, String>,
}

impl Default for ClaimsHeaders {
    fn default() -> Self {
        Self {
            scopes: "X-Auth-Scopes".to_string(),
            roles: "X-Auth-Roles".to_string(),
            user: "X-Auth-User".to_string(),
            custom: BTreeMap::new(),
        }
    }
}

impl ClaimsHeaders {
    /// Adds a custom header carrying the string claim `claim`.
    #[must_use]
    pub fn with_custom(mut self, header: impl Into<String>, claim: impl Into<String>) -> Self {
        self.custom.insert(header.into(), claim.into());
        self
    }

    /// Writes the headers, replacing any value the client sent.
    pub fn apply(&self, claims: &Claims, headers: &mut HeaderMap) {
        set(headers, &self.scopes, claims.scope());
        set(headers, &self.roles, &claims.role_str());
        set(headers, &self.user, claims.subject().unwrap_or_default());

        for (header, claim) in &self.custom {
            match claims.get_str(claim) {
                Some(value) => set(headers, header, value),
                None => tracing::debug!(claim = %claim, "Claim missing or not a string"),
            }
        }
    }
}

fn set(headers: &mut HeaderMap, name: &str, value: &str) {
    if name.is_empty() {
        return;
    }

    match (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        }
        _ => tracing::warn!(header = %name, "Skipping unrepresentable claims header"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_apply() {
        let claims = Claims::from_json(
            json!({
                "sub": "alice",
                "scope": "read write",
                "tenant": "acme",
                "level": 3,
                "realm_access": { "roles": ["admin", "viewer"] },
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("x-auth-user", HeaderValue::from_static("mallory"));

        ClaimsHeaders::default()
            .with_custom("X-Tenant", "tenant")
            .with_custom("X-Level", "level")
            .apply(&claims, &mut headers);

        assert_eq!(headers["x-auth-scopes"], "read write");
        assert_eq!(headers["x-auth-roles"], "admin viewer");
        assert_eq!(headers["x-auth-user"], "alice");
        assert_eq!(headers["x-tenant"], "acme");
        assert!(headers.get("x-level").is_none());
    }

    #[test]
    fn test_disabled_header() {
        let claims = Claims::from_json(br#"{"sub":"alice"}"#).unwrap();
        let mut headers = HeaderMap::new();

        ClaimsHeaders {
            user: String::new(),
            ..ClaimsHeaders::default()
        }
        .apply(&claims, &mut headers);

        assert!(headers.get("x-auth-user").is_none());
        assert_eq!(headers["x-auth-scopes"], "");
    }
}

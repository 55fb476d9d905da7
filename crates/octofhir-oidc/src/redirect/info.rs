//! Side-channel information cookie.
//!
//! Mirrors roles, scopes and selected claims of the current access token into
//! a plain JSON cookie so front-end code can make coarse decisions. It is
//! written on every code exchange and refresh and is never read back as a
//! credential.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::settings::InfoSettings;
use crate::claims::Claims;

/// Contents of the information cookie.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfoCookie {
    /// Role set of the token.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    /// Granted scopes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    /// Selected raw claims; missing claims are `null`.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub map: Map<String, Value>,
    /// Static values from configuration.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub custom: Map<String, Value>,
}

impl InfoCookie {
    /// Builds the cookie contents for `claims`.
    #[must_use]
    pub fn from_claims(claims: &Claims, settings: &InfoSettings) -> Self {
        Self {
            roles: if settings.roles {
                claims.roles().to_vec()
            } else {
                Vec::new()
            },
            scopes: if settings.scopes {
                claims.scope().split_whitespace().map(str::to_string).collect()
            } else {
                Vec::new()
            },
            map: settings
                .map
                .iter()
                .map(|name| (name.clone(), claims.get(name).cloned().unwrap_or(Value::Null)))
                .collect(),
            custom: settings.custom.clone(),
        }
    }

    /// JSON cookie value.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

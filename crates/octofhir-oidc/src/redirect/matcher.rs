//! Decides which unauthenticated requests get a login redirect.

use std::collections::HashMap;

use http::request::Parts;
use regex::Regex;

use super::settings::RedirectMatch;
use crate::AuthResult;

/// Compiled [`RedirectMatch`] rules.
#[derive(Debug, Clone)]
pub struct RedirectMatcher {
    no_header_key_values: HashMap<String, String>,
    no_header_keys: Vec<String>,
    path: Regex,
}

impl RedirectMatcher {
    /// Compiles the rules, filling in defaults for unset fields.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the path regex is invalid.
    pub fn new(rules: &RedirectMatch) -> AuthResult<Self> {
        let no_header_key_values = rules.no_header_key_values.clone().unwrap_or_else(|| {
            HashMap::from([("X-Requested-With".to_string(), "XMLHttpRequest".to_string())])
        });
        let no_header_keys = rules
            .no_header_keys
            .clone()
            .unwrap_or_else(|| vec!["Content-Type".to_string()]);

        Ok(Self {
            no_header_key_values,
            no_header_keys,
            path: rules.compile_regex()?,
        })
    }

    /// Returns `true` if the request may be answered with a login redirect.
    #[must_use]
    pub fn is_redirectable(&self, parts: &Parts) -> bool {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
        };

        if self
            .no_header_key_values
            .iter()
            .any(|(name, value)| header(name) == value)
        {
            return false;
        }

        if self.no_header_keys.iter().any(|name| !header(name).is_empty()) {
            return false;
        }

        self.path.is_match(parts.uri.path())
    }
}

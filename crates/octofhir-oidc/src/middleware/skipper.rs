//! Paths that bypass authentication.

use serde::{Deserialize, Serialize};

/// Skips authentication for paths ending in one of the configured suffixes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Skipper {
    /// Path suffixes to skip.
    pub suffixes: Vec<String>,
    /// Skip every request.
    pub skip_all: bool,
}

impl Default for Skipper {
    fn default() -> Self {
        Self {
            suffixes: vec![
                "/ping".to_string(),
                "/health".to_string(),
                "/metrics".to_string(),
            ],
            skip_all: false,
        }
    }
}

impl Skipper {
    /// Creates a skipper for the given suffixes.
    #[must_use]
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            suffixes: suffixes.into_iter().map(Into::into).collect(),
            skip_all: false,
        }
    }

    /// A skipper that never skips.
    #[must_use]
    pub fn none() -> Self {
        Self::new(Vec::<String>::new())
    }

    /// Skips every request.
    #[must_use]
    pub fn with_skip_all(mut self, skip_all: bool) -> Self {
        self.skip_all = skip_all;
        self
    }

    /// Returns `true` if `path` should not be authenticated.
    #[must_use]
    pub fn skip(&self, path: &str) -> bool {
        self.skip_all || self.suffixes.iter().any(|s| path.ends_with(s.as_str()))
    }
}

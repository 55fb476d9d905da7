//! Cookie read/write primitives.
//!
//! Values are percent-encoded on the way out and decoded on the way in, so
//! base64 envelopes and JSON side-channel values survive the `Cookie` header.

use cookie::{Cookie, SameSite};
use http::HeaderMap;
use http::header::{COOKIE, HeaderValue, SET_COOKIE};
use serde::{Deserialize, Serialize};

/// `SameSite` attribute as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSitePolicy {
    /// `SameSite=Lax`
    Lax,
    /// `SameSite=Strict`
    Strict,
    /// `SameSite=None`
    None,
}

impl From<SameSitePolicy> for SameSite {
    fn from(policy: SameSitePolicy) -> Self {
        match policy {
            SameSitePolicy::Lax => SameSite::Lax,
            SameSitePolicy::Strict => SameSite::Strict,
            SameSitePolicy::None => SameSite::None,
        }
    }
}

/// Attributes applied to every cookie the engine writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieSettings {
    /// Host the cookie is sent to. Unset means the request host only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Path that must prefix the request URL for the browser to send the cookie.
    pub path: String,
    /// Seconds until the cookie expires. Zero writes a session cookie.
    pub max_age: i64,
    /// Only send over HTTPS.
    pub secure: bool,
    /// Hide from JavaScript (default: on).
    pub http_only: bool,
    /// `SameSite` attribute (default: `Lax`, which still lets the provider's
    /// top-level redirect back carry the cookies).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub same_site: Option<SameSitePolicy>,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            domain: None,
            path: "/".to_string(),
            max_age: 3600, // 1 hour
            secure: false,
            http_only: true,
            same_site: Some(SameSitePolicy::Lax),
        }
    }
}

impl CookieSettings {
    /// Builds a cookie carrying `value`.
    #[must_use]
    pub fn build(&self, name: &str, value: &str) -> Cookie<'static> {
        let mut builder = Cookie::build((name.to_string(), value.to_string()))
            .path(self.path.clone())
            .secure(self.secure)
            .http_only(self.http_only);

        if self.max_age > 0 {
            builder = builder.max_age(cookie::time::Duration::seconds(self.max_age));
        }
        if let Some(domain) = &self.domain {
            builder = builder.domain(domain.clone());
        }
        if let Some(same_site) = self.same_site {
            builder = builder.same_site(same_site.into());
        }

        builder.build()
    }

    /// Builds a cookie that makes the browser delete `name`.
    #[must_use]
    pub fn removal(&self, name: &str) -> Cookie<'static> {
        let mut cookie = self.build(name, "");
        cookie.set_max_age(cookie::time::Duration::ZERO);
        cookie
    }
}

/// Cookies to emit as `Set-Cookie` headers on the response.
#[derive(Debug, Clone, Default)]
pub struct ResponseCookies {
    cookies: Vec<Cookie<'static>>,
}

impl ResponseCookies {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a cookie.
    pub fn add(&mut self, cookie: Cookie<'static>) {
        self.cookies.push(cookie);
    }

    /// Returns the last queued cookie named `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Cookie<'static>> {
        self.cookies.iter().rev().find(|c| c.name() == name)
    }

    /// Iterates over queued cookies in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Cookie<'static>> {
        self.cookies.iter()
    }

    /// Number of queued cookies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Renders every cookie as a `Set-Cookie` header value.
    pub fn header_values(&self) -> impl Iterator<Item = String> + '_ {
        self.cookies.iter().map(|c| c.encoded().to_string())
    }

    /// Appends a `Set-Cookie` header for every queued cookie.
    pub fn apply_to(&self, headers: &mut HeaderMap) {
        for value in self.header_values() {
            match HeaderValue::from_str(&value) {
                Ok(value) => {
                    headers.append(SET_COOKIE, value);
                }
                Err(e) => tracing::warn!(error = %e, "Dropping unrepresentable Set-Cookie value"),
            }
        }
    }
}

/// Parses every cookie sent in the request `Cookie` headers.
fn request_cookies(headers: &HeaderMap) -> Vec<Cookie<'static>> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| {
            Cookie::split_parse_encoded(v.to_string())
                .filter_map(Result::ok)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Reads the decoded value of the request cookie `name`.
#[must_use]
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    request_cookies(headers)
        .into_iter()
        .find(|c| c.name() == name)
        .map(|c| c.value().to_string())
}

/// Rewrites the request `Cookie` header so `name` carries `value`.
///
/// Later reads of the same request see the new value without a round trip.
pub fn replace_request_cookie(headers: &mut HeaderMap, name: &str, value: &str) {
    let mut cookies = request_cookies(headers);
    match cookies.iter_mut().find(|c| c.name() == name) {
        Some(cookie) => cookie.set_value(value.to_string()),
        None => cookies.push(Cookie::new(name.to_string(), value.to_string())),
    }

    let rendered = cookies
        .iter()
        .map(|c| c.encoded().stripped().to_string())
        .collect::<Vec<_>>()
        .join("; ");

    match HeaderValue::from_str(&rendered) {
        Ok(header) => {
            headers.remove(COOKIE);
            headers.insert(COOKIE, header);
        }
        Err(e) => tracing::warn!(error = %e, "Failed to rewrite request Cookie header"),
    }
}

//! Redirect URI reconstruction and provider redirect URLs.

use http::header::HOST;
use http::request::Parts;
use url::Url;

use crate::AuthResult;
use crate::error::AuthError;

const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
const X_FORWARDED_HOST: &str = "x-forwarded-host";

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// Scheme and host the browser used to reach the service.
///
/// Precedence:
///
/// 1. `base_url`
/// 2. `X-Forwarded-Proto` + `X-Forwarded-Host`, when both are present
/// 3. `Host` header (or the request URI authority) with `default_scheme`
fn origin(
    parts: &Parts,
    base_url: Option<&str>,
    default_scheme: &str,
) -> AuthResult<Option<(String, String)>> {
    if let Some(base_url) = base_url.filter(|b| !b.is_empty()) {
        let parsed = Url::parse(base_url)
            .map_err(|e| AuthError::configuration(format!("invalid base_url '{base_url}': {e}")))?;
        let mut host = parsed.host_str().unwrap_or_default().to_string();
        if let Some(port) = parsed.port() {
            host = format!("{host}:{port}");
        }
        return Ok(Some((parsed.scheme().to_string(), host)));
    }

    if let (Some(proto), Some(host)) = (
        header(parts, X_FORWARDED_PROTO),
        header(parts, X_FORWARDED_HOST),
    ) {
        return Ok(Some((proto.to_string(), host.to_string())));
    }

    let host = header(parts, HOST.as_str())
        .map(str::to_string)
        .or_else(|| parts.uri.authority().map(|a| a.to_string()));

    let scheme = if default_scheme.is_empty() {
        "https"
    } else {
        default_scheme
    };

    Ok(host.map(|host| (scheme.to_string(), host)))
}

/// Rebuilds the absolute URL of the current request for `path`, without a
/// query.
///
/// Without any host information the bare path is returned.
///
/// # Errors
///
/// Returns `Configuration` if `base_url` is not a valid URL.
pub fn absolute_url(
    parts: &Parts,
    path: &str,
    base_url: Option<&str>,
    default_scheme: &str,
) -> AuthResult<String> {
    Ok(match origin(parts, base_url, default_scheme)? {
        Some((scheme, host)) => format!("{scheme}://{host}{path}"),
        None => path.to_string(),
    })
}

/// The `redirect_uri` sent to the provider.
///
/// Scheme and host come from [`absolute_url`]; the path is `callback` when
/// set, otherwise the request path. The query is always dropped.
///
/// # Errors
///
/// Returns `Configuration` if `base_url` is not a valid URL.
pub fn redirect_uri(
    parts: &Parts,
    callback: Option<&str>,
    base_url: Option<&str>,
    default_scheme: &str,
) -> AuthResult<String> {
    let path = callback
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| parts.uri.path());
    absolute_url(parts, path, base_url, default_scheme)
}

/// Authorization endpoint URL that starts a login.
///
/// # Errors
///
/// Returns `Configuration` if `auth_url` is not a valid URL.
pub fn login_url(
    auth_url: &str,
    client_id: &str,
    scopes: &[String],
    state: &str,
    redirect_uri: &str,
) -> AuthResult<String> {
    let mut url = Url::parse(auth_url)
        .map_err(|e| AuthError::configuration(format!("invalid auth url '{auth_url}': {e}")))?;

    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("state", state)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("client_id", client_id);
        if !scopes.is_empty() {
            query.append_pair("scope", &scopes.join(" "));
        }
    }

    Ok(url.into())
}

/// End-session endpoint URL.
///
/// # Errors
///
/// Returns `Configuration` if `logout_url` is not a valid URL.
pub fn logout_url(
    logout_url: &str,
    id_token: Option<&str>,
    post_logout_redirect_uri: &str,
) -> AuthResult<String> {
    let mut url = Url::parse(logout_url)
        .map_err(|e| AuthError::configuration(format!("invalid logout url '{logout_url}': {e}")))?;

    {
        let mut query = url.query_pairs_mut();
        if let Some(id_token) = id_token {
            query.append_pair("id_token_hint", id_token);
        }
        query.append_pair("post_logout_redirect_uri", post_logout_redirect_uri);
    }

    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use http::Request;

    use super::*;

    fn parts(uri: &str, headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_host_header_with_default_scheme() {
        let parts = parts("/app?x=1", &[("host", "svc.local:8080")]);
        assert_eq!(
            redirect_uri(&parts, None, None, "https").unwrap(),
            "https://svc.local:8080/app"
        );
        assert_eq!(
            redirect_uri(&parts, Some("/cb"), None, "http").unwrap(),
            "http://svc.local:8080/cb"
        );
    }

    #[test]
    fn test_forwarded_headers_need_both() {
        let both = parts(
            "/app",
            &[
                ("host", "internal:80"),
                ("x-forwarded-proto", "https"),
                ("x-forwarded-host", "public.example.com"),
            ],
        );
        assert_eq!(
            redirect_uri(&both, None, None, "http").unwrap(),
            "https://public.example.com/app"
        );

        let only_host = parts(
            "/app",
            &[("host", "internal:80"), ("x-forwarded-host", "public.example.com")],
        );
        assert_eq!(
            redirect_uri(&only_host, None, None, "http").unwrap(),
            "http://internal:80/app"
        );
    }

    #[test]
    fn test_base_url_overrides() {
        let parts = parts(
            "/app",
            &[("x-forwarded-proto", "http"), ("x-forwarded-host", "fwd")],
        );
        assert_eq!(
            redirect_uri(&parts, Some("/cb"), Some("https://ext.example.com:8443/ignored"), "http")
                .unwrap(),
            "https://ext.example.com:8443/cb"
        );
        assert!(redirect_uri(&parts, None, Some("not a url"), "https").is_err());
    }

    #[test]
    fn test_login_url() {
        let url = login_url(
            "https://idp/auth?kc_idp_hint=x",
            "app",
            &["openid".to_string(), "email".to_string()],
            "st",
            "https://svc/cb",
        )
        .unwrap();

        let parsed = Url::parse(&url).unwrap();
        let pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("kc_idp_hint".to_string(), "x".to_string()),
                ("response_type".to_string(), "code".to_string()),
                ("state".to_string(), "st".to_string()),
                ("redirect_uri".to_string(), "https://svc/cb".to_string()),
                ("client_id".to_string(), "app".to_string()),
                ("scope".to_string(), "openid email".to_string()),
            ]
        );
    }

    #[test]
    fn test_logout_url() {
        let url = logout_url("https://idp/logout", Some("idt"), "https://svc/").unwrap();
        assert_eq!(
            url,
            "https://idp/logout?id_token_hint=idt&post_logout_redirect_uri=https%3A%2F%2Fsvc%2F"
        );

        let url = logout_url("https://idp/logout", None, "https://svc/").unwrap();
        assert!(!url.contains("id_token_hint"));
    }
}

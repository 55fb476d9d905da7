//! Redirect flow against a stub identity provider.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{cookie_header, init_tracing, now, request, unsigned_token, url_param};
use octofhir_oidc::prelude::*;
use octofhir_oidc::redirect::{AccessToken, InfoSettings};
use octofhir_oidc::store::read_cookie;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider(server: &MockServer) -> Arc<dyn Provider> {
    Arc::new(
        GenericProvider::new("app")
            .with_client_secret("s3cret")
            .with_auth_url(format!("{}/auth", server.uri()))
            .with_token_url(format!("{}/token", server.uri()))
            .with_logout_url(format!("{}/logout", server.uri())),
    )
}

/// Runs the login redirect and returns the state plus the browser cookies.
async fn start_login(engine: &RedirectEngine, uri: &str) -> (String, ResponseCookies) {
    init_tracing();
    let mut parts = request(uri, &[]);
    let mut cookies = ResponseCookies::new();

    let outcome = engine.handle(&mut parts, &mut cookies).await.unwrap();
    let FlowOutcome::Redirect { location } = outcome else {
        panic!("expected login redirect, got {outcome:?}");
    };
    (url_param(&location, "state").unwrap(), cookies)
}

#[tokio::test]
async fn test_code_exchange_restores_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=c1"))
        .and(body_string_contains(
            "redirect_uri=https%3A%2F%2Fsvc.example.com%2Fauth%2Fcallback",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok1",
            "refresh_token": "r1",
            "token_type": "Bearer",
            "expires_in": 300,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let settings = RedirectSettings {
        callback: Some("/auth/callback".to_string()),
        callback_set: true,
        ..RedirectSettings::default()
    };
    let engine = RedirectEngine::builder(provider(&server), settings)
        .build()
        .unwrap();

    let (state, cookies) = start_login(&engine, "/orders?page=2").await;

    let header = cookie_header(&cookies);
    let uri = format!("/auth/callback?code=c1&state={state}&session_state=xyz");
    let mut parts = request(&uri, &[("cookie", header.as_str())]);
    let mut cookies = ResponseCookies::new();

    let outcome = engine.handle(&mut parts, &mut cookies).await.unwrap();
    assert_eq!(
        outcome,
        FlowOutcome::Redirect {
            location: "/orders".to_string()
        }
    );

    let record = TokenRecord::decode_envelope(cookies.get("auth_app").unwrap().value()).unwrap();
    assert_eq!(record.access_token, "tok1");
    assert_eq!(record.refresh_token, "r1");
    assert_eq!(cookies.get("auth_app_redirect").unwrap().value(), "");
}

#[tokio::test]
async fn test_code_exchange_keeps_query() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "tok1" })))
        .expect(1)
        .mount(&server)
        .await;

    let engine = RedirectEngine::builder(provider(&server), RedirectSettings::default())
        .build()
        .unwrap();

    let (state, cookies) = start_login(&engine, "/orders?page=2").await;

    let header = cookie_header(&cookies);
    let uri = format!("/orders?page=2&code=c1&state={state}");
    let mut parts = request(&uri, &[("cookie", header.as_str())]);
    let mut cookies = ResponseCookies::new();

    let outcome = engine.handle(&mut parts, &mut cookies).await.unwrap();
    assert_eq!(
        outcome,
        FlowOutcome::Redirect {
            location: "/orders?page=2".to_string()
        }
    );

    // the next request is authenticated
    let header = cookie_header(&cookies);
    let mut parts = request("/orders?page=2", &[("cookie", header.as_str())]);
    let mut cookies = ResponseCookies::new();
    let outcome = engine.handle(&mut parts, &mut cookies).await.unwrap();
    assert!(matches!(outcome, FlowOutcome::Proceed { record: Some(ref r) } if r.access_token == "tok1"));
    assert_eq!(
        parts.extensions.get::<AccessToken>().map(|t| t.0.as_str()),
        Some("tok1")
    );
}

#[tokio::test]
async fn test_failed_exchange_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid_grant" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let engine = RedirectEngine::builder(provider(&server), RedirectSettings::default())
        .build()
        .unwrap();

    let (state, cookies) = start_login(&engine, "/orders").await;
    let header = cookie_header(&cookies);
    let uri = format!("/orders?code=bad&state={state}");
    let mut parts = request(&uri, &[("cookie", header.as_str())]);
    let mut cookies = ResponseCookies::new();

    let err = engine.handle(&mut parts, &mut cookies).await.unwrap_err();
    assert!(matches!(err, AuthError::TokenExchange { .. }));
    assert!(cookies.get("auth_app").is_none());

    // the state was spent on the failed attempt
    assert_eq!(cookies.get("auth_app_redirect").unwrap().value(), "");
    assert!(
        cookies
            .header_values()
            .any(|c| c.starts_with("auth_app_redirect=;") && c.contains("Max-Age=0"))
    );

    // retrying the callback starts a new login instead of a second exchange
    let mut parts = request(&uri, &[]);
    let mut cookies = ResponseCookies::new();
    let outcome = engine.handle(&mut parts, &mut cookies).await.unwrap();
    assert!(matches!(outcome, FlowOutcome::Redirect { ref location } if location.contains("/auth?")));
}

#[tokio::test]
async fn test_slow_token_endpoint_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access_token": "tok1" }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let engine = RedirectEngine::builder(provider(&server), RedirectSettings::default())
        .http_timeout(Duration::from_millis(200))
        .build()
        .unwrap();

    let (state, cookies) = start_login(&engine, "/orders").await;
    let header = cookie_header(&cookies);
    let uri = format!("/orders?code=c1&state={state}");
    let mut parts = request(&uri, &[("cookie", header.as_str())]);
    let mut cookies = ResponseCookies::new();

    let err = engine.handle(&mut parts, &mut cookies).await.unwrap_err();
    assert!(matches!(err, AuthError::TokenExchange { .. }));
}

#[tokio::test]
async fn test_state_mismatch_makes_no_token_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "tok1" })))
        .expect(0)
        .mount(&server)
        .await;

    let engine = RedirectEngine::builder(provider(&server), RedirectSettings::default())
        .build()
        .unwrap();

    let (_, cookies) = start_login(&engine, "/orders").await;
    let header = cookie_header(&cookies);
    let mut parts = request("/orders?code=c1&state=attacker", &[("cookie", header.as_str())]);
    let mut cookies = ResponseCookies::new();

    let outcome = engine.handle(&mut parts, &mut cookies).await.unwrap();
    assert!(matches!(outcome, FlowOutcome::Redirect { ref location } if location.contains("/auth?")));
    assert!(cookies.get("auth_app").is_none());

    // no redirect value at all
    let mut parts = request("/orders?code=c1&state=s", &[]);
    let outcome = engine.handle(&mut parts, &mut cookies).await.unwrap();
    assert!(matches!(outcome, FlowOutcome::Redirect { .. }));
}

#[tokio::test]
async fn test_refresh_near_expiry() {
    let server = MockServer::start().await;
    let fresh = unsigned_token(&json!({
        "sub": "alice",
        "exp": now() + 3600,
        "scope": "openid read",
        "realm_access": { "roles": ["viewer"] },
    }));
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": fresh,
            "refresh_token": "r2",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let settings = RedirectSettings {
        refresh_token: true,
        token_header: true,
        information: InfoSettings {
            name: Some("auth_info".to_string()),
            roles: true,
            scopes: true,
            ..InfoSettings::default()
        },
        ..RedirectSettings::default()
    };
    let engine = RedirectEngine::builder(provider(&server), settings)
        .build()
        .unwrap();

    let stale = TokenRecord {
        access_token: unsigned_token(&json!({ "sub": "alice", "exp": now() + 5 })),
        refresh_token: "r1".to_string(),
        ..TokenRecord::default()
    };
    let header = format!("other=1; auth_app={}", stale.encode_envelope().unwrap());
    let mut parts = request("/orders", &[("cookie", header.as_str())]);
    let mut cookies = ResponseCookies::new();

    let outcome = engine.handle(&mut parts, &mut cookies).await.unwrap();
    let FlowOutcome::Proceed { record: Some(record) } = outcome else {
        panic!("expected proceed, got {outcome:?}");
    };
    assert_eq!(record.access_token, fresh);
    assert_eq!(record.refresh_token, "r2");

    // the request itself now carries the refreshed envelope
    let patched = read_cookie(&parts.headers, "auth_app").unwrap();
    assert_eq!(
        TokenRecord::decode_envelope(&patched).unwrap().access_token,
        fresh
    );
    assert_eq!(read_cookie(&parts.headers, "other").as_deref(), Some("1"));
    assert_eq!(
        parts.headers[http::header::AUTHORIZATION],
        format!("Bearer {fresh}").as_str()
    );

    let info: serde_json::Value =
        serde_json::from_str(cookies.get("auth_info").unwrap().value()).unwrap();
    assert_eq!(info["roles"], json!(["viewer"]));
    assert_eq!(info["scopes"], json!(["openid", "read"]));

    // tokens stay hidden from scripts, the info cookie does not
    assert_eq!(cookies.get("auth_app").unwrap().http_only(), Some(true));
    assert_eq!(cookies.get("auth_info").unwrap().http_only(), Some(false));
}

#[tokio::test]
async fn test_session_backed_login() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok1",
            "id_token": "idt",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let registry = Arc::new(SessionRegistry::new());
    let store = Arc::new(MemorySessionStore::new(CookieSettings::default()));
    registry.register("memory", store.clone());

    let settings = RedirectSettings {
        use_session: true,
        session_store: "memory".to_string(),
        logout: octofhir_oidc::redirect::LogoutSettings {
            path: Some("/logout".to_string()),
            redirect: Some("https://svc.example.com/bye".to_string()),
        },
        ..RedirectSettings::default()
    };
    let engine = RedirectEngine::builder(provider(&server), settings)
        .session_registry(registry)
        .build()
        .unwrap();

    let (state, cookies) = start_login(&engine, "/orders").await;
    let header = cookie_header(&cookies);
    let uri = format!("/orders?code=c1&state={state}");
    let mut parts = request(&uri, &[("cookie", header.as_str())]);
    let mut cookies = ResponseCookies::new();
    let outcome = engine.handle(&mut parts, &mut cookies).await.unwrap();
    assert!(matches!(outcome, FlowOutcome::Redirect { .. }));

    // the browser only holds a session id
    let id = cookies.get("auth_app").unwrap().value().to_string();
    assert!(TokenRecord::decode_envelope(&id).is_err());

    let header = cookie_header(&cookies);
    let mut parts = request("/orders", &[("cookie", header.as_str())]);
    let mut next = ResponseCookies::new();
    let outcome = engine.handle(&mut parts, &mut next).await.unwrap();
    assert!(matches!(outcome, FlowOutcome::Proceed { record: Some(ref r) } if r.access_token == "tok1"));

    // logout drops the server-side session
    let mut parts = request("/logout", &[("cookie", header.as_str())]);
    let mut out = ResponseCookies::new();
    let outcome = engine.handle(&mut parts, &mut out).await.unwrap();
    let FlowOutcome::Redirect { location } = outcome else {
        panic!("expected logout redirect");
    };
    assert_eq!(url_param(&location, "id_token_hint").as_deref(), Some("idt"));
    assert_eq!(
        url_param(&location, "post_logout_redirect_uri").as_deref(),
        Some("https://svc.example.com/bye")
    );
    assert!(store.is_empty());
}

//! Authentication middleware and claims extractor.
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, middleware::from_fn_with_state, routing::get};
//! use octofhir_oidc::middleware::{AuthClaims, Authenticator, authenticate};
//!
//! async fn me(AuthClaims(claims): AuthClaims) -> String {
//!     claims.subject().unwrap_or_default().to_string()
//! }
//!
//! let auth = Arc::new(Authenticator::new(parser).with_engine(engine));
//! let app = Router::new()
//!     .route("/me", get(me))
//!     .layer(from_fn_with_state(auth, authenticate));
//! ```

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

use super::headers::ClaimsHeaders;
use super::skipper::Skipper;
use crate::claims::Claims;
use crate::error::AuthError;
use crate::redirect::{AccessToken, FlowOutcome, RedirectEngine};
use crate::store::ResponseCookies;
use crate::token::TokenParser;

/// Everything [`authenticate`] needs.
#[derive(Debug)]
pub struct Authenticator {
    parser: TokenParser,
    engine: Option<RedirectEngine>,
    skipper: Skipper,
    claims_headers: Option<ClaimsHeaders>,
}

impl Authenticator {
    /// Verifies bearer tokens only, skipping the default health paths.
    #[must_use]
    pub fn new(parser: TokenParser) -> Self {
        Self {
            parser,
            engine: None,
            skipper: Skipper::default(),
            claims_headers: None,
        }
    }

    /// Runs the browser redirect flow before verification.
    #[must_use]
    pub fn with_engine(mut self, engine: RedirectEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Replaces the skipper.
    #[must_use]
    pub fn with_skipper(mut self, skipper: Skipper) -> Self {
        self.skipper = skipper;
        self
    }

    /// Forwards claims to the handler as request headers.
    #[must_use]
    pub fn with_claims_headers(mut self, headers: ClaimsHeaders) -> Self {
        self.claims_headers = Some(headers);
        self
    }

    /// Token parser.
    #[must_use]
    pub fn parser(&self) -> &TokenParser {
        &self.parser
    }

    /// Redirect engine, if configured.
    #[must_use]
    pub fn engine(&self) -> Option<&RedirectEngine> {
        self.engine.as_ref()
    }

    /// Stops background key refresh.
    pub async fn shutdown(&self) {
        self.parser.shutdown().await;
    }

    async fn verify(&self, parts: &mut Parts) -> Result<(), AuthError> {
        let token = parts
            .extensions
            .get::<AccessToken>()
            .map(|t| t.0.clone())
            .or_else(|| bearer_token(&parts.headers));

        let claims = match token {
            Some(token) => self.parser.parse(&token).await?,
            None if self.parser.is_noop() => return Ok(()),
            None => return Err(AuthError::unauthorized("missing bearer token")),
        };

        if let Some(headers) = &self.claims_headers {
            headers.apply(&claims, &mut parts.headers);
        }
        parts.extensions.insert(claims);
        Ok(())
    }
}

/// Authenticates a request.
///
/// 1. Skipped paths pass through untouched.
/// 2. The redirect engine, if any, may answer with a 307 on its own.
/// 3. The access token (from the engine or `Authorization: Bearer`) is
///    parsed and its [`Claims`] inserted as a request extension.
/// 4. Verification failures go back to the engine, which redirects browsers;
///    everyone else gets a 401.
///
/// Cookies written by the engine are added to whatever response leaves.
pub async fn authenticate(
    State(auth): State<Arc<Authenticator>>,
    request: Request,
    next: Next,
) -> Response {
    if auth.skipper.skip(request.uri().path()) {
        return next.run(request).await;
    }

    let (mut parts, body) = request.into_parts();
    let mut cookies = ResponseCookies::new();

    if let Some(engine) = &auth.engine {
        match engine.handle(&mut parts, &mut cookies).await {
            Ok(FlowOutcome::Proceed { .. }) => {}
            Ok(FlowOutcome::Redirect { location }) => {
                return with_cookies(Redirect::temporary(&location).into_response(), &cookies);
            }
            Ok(FlowOutcome::Unauthorized) => {
                return with_cookies(
                    AuthError::unauthorized("authentication required").into_response(),
                    &cookies,
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, path = parts.uri.path(), "Redirect flow failed");
                return with_cookies(
                    AuthError::unauthorized("authentication failed").into_response(),
                    &cookies,
                );
            }
        }
    }

    if let Err(error) = auth.verify(&mut parts).await {
        let response = match &auth.engine {
            Some(engine) => {
                match engine
                    .on_verification_failure(&mut parts, &error, &mut cookies)
                    .await
                {
                    Ok(FlowOutcome::Redirect { location }) => {
                        Redirect::temporary(&location).into_response()
                    }
                    Ok(_) => error.into_response(),
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to restart login");
                        error.into_response()
                    }
                }
            }
            None => {
                tracing::debug!(error = %error, path = parts.uri.path(), "Request not authenticated");
                error.into_response()
            }
        };
        return with_cookies(response, &cookies);
    }

    let response = next.run(Request::from_parts(parts, body)).await;
    with_cookies(response, &cookies)
}

fn with_cookies(mut response: Response, cookies: &ResponseCookies) -> Response {
    cookies.apply_to(response.headers_mut());
    response
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
}

/// Extractor for the claims attached by [`authenticate`].
///
/// Rejects with `401` when the request carries no claims.
#[derive(Debug, Clone)]
pub struct AuthClaims(pub Claims);

impl<S> FromRequestParts<S> for AuthClaims
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Claims>()
            .cloned()
            .map(Self)
            .ok_or_else(|| AuthError::unauthorized("claims not found"))
    }
}

//! # octofhir-oidc
//!
//! Embeddable OAuth2/OIDC authentication core.
//!
//! This crate provides:
//! - Provider descriptions for Keycloak, generic OIDC servers and a noop
//!   provider that disables authentication
//! - Cached remote key sets with background refresh and bounded unknown-kid
//!   refresh, merged across providers and locally given keys
//! - Token parsing by signature, remote introspection or no verification
//! - A browser authorization-code redirect flow with cookie or session
//!   persistence, token refresh and logout
//! - An axum adapter with role and scope guards
//!
//! ## Modules
//!
//! - [`claims`] - Normalized token claims with role and scope sets
//! - [`provider`] - Identity provider abstraction
//! - [`jwks`] - Key resolution
//! - [`token`] - Token parser, introspection and a local HMAC issuer
//! - [`oauth2`] - Token endpoint grants
//! - [`store`] - Token envelope, state, cookies and sessions
//! - [`redirect`] - Redirect flow engine
//! - [`middleware`] - axum adapter
//! - [`config`] - Configuration and loader

pub mod claims;
pub mod clock;
pub mod config;
pub mod error;
pub mod jwks;
pub mod middleware;
pub mod oauth2;
pub mod provider;
pub mod redirect;
pub mod store;
pub mod token;

#[cfg(test)]
mod test_support;

/// Type alias for authentication results.
pub type AuthResult<T> = Result<T, error::AuthError>;

/// Prelude module for convenient imports.
///
/// Modules stay the canonical paths; this is the one flat re-export.
///
/// ```ignore
/// use octofhir_oidc::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::claims::Claims;
    pub use crate::clock::{Clock, FixedClock, SystemClock};
    pub use crate::config::{ConfigError, OidcConfig};
    pub use crate::error::{AuthError, ErrorCategory};
    pub use crate::jwks::{GivenKeys, JwksOptions, KeyResolver, KeySet, MultiKeySet};
    pub use crate::middleware::{
        AuthClaims, Authenticator, ClaimsHeaders, RoleGuard, ScopeGuard, Skipper, authenticate,
        guard,
    };
    pub use crate::provider::{
        GenericProvider, KeycloakProvider, NoopProvider, Provider, ProvidersConfig,
    };
    pub use crate::redirect::{
        AccessToken, FlowOutcome, RedirectEngine, RedirectSettings, SkipRedirect,
    };
    pub use crate::store::{
        CookieSettings, MemorySessionStore, ResponseCookies, SessionRegistry, SessionStore,
        TokenRecord,
    };
    pub use crate::token::{JwtIssuer, ParserOptions, TokenParser};
}

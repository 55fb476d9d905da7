//! axum adapter.
//!
//! - [`authenticate`]: redirect flow plus token verification, attaching
//!   [`Claims`](crate::claims::Claims) to the request
//! - [`guard`] with [`RoleGuard`] / [`ScopeGuard`]: permission checks on the
//!   attached claims
//! - [`ClaimsHeaders`]: forwards claims as request headers
//! - [`Skipper`]: paths that bypass authentication
//!
//! `AuthError` implements `IntoResponse` here.

pub mod auth;
pub mod error;
pub mod guard;
pub mod headers;
pub mod skipper;

pub use auth::{AuthClaims, Authenticator, authenticate};
pub use error::status_code;
pub use guard::{Guard, RoleGuard, ScopeGuard, guard};
pub use headers::ClaimsHeaders;
pub use skipper::Skipper;

//! Role and scope guards.
//!
//! Guards run after [`authenticate`](super::authenticate) and read the
//! [`Claims`] it attached.
//!
//! ```ignore
//! let admin = Arc::new(RoleGuard::new(["admin"]).with_methods([Method::POST, Method::DELETE]));
//! let app = Router::new()
//!     .route("/orders", post(create).delete(remove))
//!     .layer(axum::middleware::from_fn_with_state(admin, guard::<RoleGuard>));
//! ```

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::AuthResult;
use crate::claims::Claims;
use crate::error::AuthError;

/// A permission check over request claims.
pub trait Guard: Send + Sync + 'static {
    /// Checks the request.
    ///
    /// # Errors
    ///
    /// - `Unauthorized` if the check applies and there are no claims
    /// - `Forbidden` if the claims do not satisfy the check
    fn check(&self, method: &Method, claims: Option<&Claims>) -> AuthResult<()>;
}

#[derive(Debug, Clone, Default)]
struct Rule {
    values: Vec<String>,
    methods: Vec<Method>,
    noop: bool,
}

impl Rule {
    fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: values.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    fn applies(&self, method: &Method) -> bool {
        !self.noop && (self.methods.is_empty() || self.methods.contains(method))
    }

    fn claims<'a>(&self, claims: Option<&'a Claims>) -> AuthResult<&'a Claims> {
        claims.ok_or_else(|| AuthError::unauthorized("claims not found"))
    }
}

/// Requires at least one of the listed roles.
#[derive(Debug, Clone, Default)]
pub struct RoleGuard {
    rule: Rule,
}

impl RoleGuard {
    /// Creates a guard for `roles`.
    #[must_use]
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rule: Rule::new(roles),
        }
    }

    /// Only checks requests with one of these methods.
    #[must_use]
    pub fn with_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.rule.methods = methods.into_iter().collect();
        self
    }

    /// Disables the check, for use with the noop provider.
    #[must_use]
    pub fn with_noop(mut self, noop: bool) -> Self {
        self.rule.noop = noop;
        self
    }
}

impl Guard for RoleGuard {
    fn check(&self, method: &Method, claims: Option<&Claims>) -> AuthResult<()> {
        if !self.rule.applies(method) {
            return Ok(());
        }

        if self.rule.claims(claims)?.has_any_role(&self.rule.values) {
            Ok(())
        } else {
            Err(AuthError::forbidden("role not authorized"))
        }
    }
}

/// Requires at least one of the listed scopes.
#[derive(Debug, Clone, Default)]
pub struct ScopeGuard {
    rule: Rule,
}

impl ScopeGuard {
    /// Creates a guard for `scopes`.
    #[must_use]
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rule: Rule::new(scopes),
        }
    }

    /// Only checks requests with one of these methods.
    #[must_use]
    pub fn with_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.rule.methods = methods.into_iter().collect();
        self
    }

    /// Disables the check, for use with the noop provider.
    #[must_use]
    pub fn with_noop(mut self, noop: bool) -> Self {
        self.rule.noop = noop;
        self
    }
}

impl Guard for ScopeGuard {
    fn check(&self, method: &Method, claims: Option<&Claims>) -> AuthResult<()> {
        if !self.rule.applies(method) {
            return Ok(());
        }

        if self.rule.claims(claims)?.has_any_scope(&self.rule.values) {
            Ok(())
        } else {
            Err(AuthError::forbidden("scope not authorized"))
        }
    }
}

/// Middleware running a [`Guard`].
pub async fn guard<G: Guard>(State(guard): State<Arc<G>>, request: Request, next: Next) -> Response {
    if let Err(e) = guard.check(request.method(), request.extensions().get::<Claims>()) {
        tracing::debug!(error = %e, method = %request.method(), path = request.uri().path(), "Guard rejected request");
        return e.into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn claims() -> Claims {
        Claims::from_json(
            json!({
                "scope": "read write",
                "realm_access": { "roles": ["viewer"] },
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap()
    }

    #[test]
    fn test_role_guard() {
        let guard = RoleGuard::new(["admin", "viewer"]);
        assert!(guard.check(&Method::GET, Some(&claims())).is_ok());

        let guard = RoleGuard::new(["admin"]);
        assert!(matches!(
            guard.check(&Method::GET, Some(&claims())),
            Err(AuthError::Forbidden { .. })
        ));
        assert!(matches!(
            guard.check(&Method::GET, None),
            Err(AuthError::Unauthorized { .. })
        ));
    }

    #[test]
    fn test_scope_guard() {
        assert!(ScopeGuard::new(["write"]).check(&Method::POST, Some(&claims())).is_ok());
        assert!(matches!(
            ScopeGuard::new(["delete"]).check(&Method::POST, Some(&claims())),
            Err(AuthError::Forbidden { .. })
        ));
    }

    #[test]
    fn test_method_filter_and_noop() {
        let guard = RoleGuard::new(["admin"]).with_methods([Method::POST]);
        assert!(guard.check(&Method::GET, None).is_ok());
        assert!(guard.check(&Method::POST, Some(&claims())).is_err());

        let guard = ScopeGuard::new(["admin"]).with_noop(true);
        assert!(guard.check(&Method::DELETE, None).is_ok());
    }
}

//! Provider that disables authentication.

use super::{PROVIDER_NOOP, Provider};
use crate::AuthResult;
use crate::oauth2::ClientCredentialsConfig;

/// Sentinel value returned by every [`NoopProvider`] getter.
pub const NOOP_KEY: &str = "noop";

/// Provider used when authentication is turned off.
///
/// Never performs I/O. Tokens are decoded without verification so claims
/// are still available to handlers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoopProvider;

impl Provider for NoopProvider {
    fn name(&self) -> &str {
        PROVIDER_NOOP
    }

    fn cert_url(&self) -> Option<&str> {
        Some(NOOP_KEY)
    }

    fn introspect_url(&self) -> Option<&str> {
        Some(NOOP_KEY)
    }

    fn auth_url(&self) -> Option<&str> {
        Some(NOOP_KEY)
    }

    fn token_url(&self) -> Option<&str> {
        Some(NOOP_KEY)
    }

    fn logout_url(&self) -> Option<&str> {
        Some(NOOP_KEY)
    }

    fn client_id(&self) -> &str {
        NOOP_KEY
    }

    fn client_secret(&self) -> Option<&str> {
        Some(NOOP_KEY)
    }

    fn scopes(&self) -> &[String] {
        &[]
    }

    fn client_config(&self) -> AuthResult<Option<ClientCredentialsConfig>> {
        Ok(None)
    }

    fn is_noop(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_getter_is_sentinel() {
        let p = NoopProvider;
        for url in [
            p.cert_url(),
            p.introspect_url(),
            p.auth_url(),
            p.auth_url_external(),
            p.token_url(),
            p.token_url_external(),
            p.logout_url(),
            p.logout_url_external(),
            p.client_secret(),
            p.client_secret_external(),
        ] {
            assert_eq!(url, Some(NOOP_KEY));
        }
        assert_eq!(p.client_id_external(), NOOP_KEY);
        assert!(p.scopes().is_empty());
        assert!(p.is_noop());
        assert!(p.client_config().unwrap().is_none());
    }
}

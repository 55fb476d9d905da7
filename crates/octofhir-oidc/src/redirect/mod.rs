//! Browser authorization-code flow.
//!
//! The [`RedirectEngine`] sits in front of token verification. For browser
//! requests without credentials it stores a [`RedirectValue`] and sends the
//! user to the provider's login page; on the callback it checks the state,
//! exchanges the code, persists the [`TokenRecord`](crate::store::TokenRecord)
//! and lands the browser on a clean URL. Later requests get the persisted
//! access token attached and refreshed before it expires.
//!
//! Token envelopes and redirect values live either in cookies or in a
//! [`SessionStore`](crate::store::SessionStore) picked from a
//! [`SessionRegistry`](crate::store::SessionRegistry).

pub mod engine;
pub mod info;
pub mod matcher;
pub mod settings;
pub mod uri;
pub mod value;

pub use engine::{
    AccessToken, AgentPredicate, FlowOutcome, RedirectEngine, RedirectEngineBuilder,
    SkipRedirect,
};
pub use info::InfoCookie;
pub use matcher::RedirectMatcher;
pub use settings::{
    DEFAULT_REDIRECT_PATH_REGEX, InfoSettings, LogoutSettings, RedirectMatch, RedirectSettings,
    RegexPath,
};
pub use value::{AUTH_QUERY_PARAMS, RedirectValue};

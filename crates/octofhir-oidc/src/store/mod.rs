//! Persistence primitives for the redirect flow.
//!
//! - [`TokenRecord`] and its base64 JSON envelope
//! - CSRF state generation
//! - cookie settings and request/response cookie helpers
//! - the [`SessionStore`] trait, an in-memory store and a [`SessionRegistry`]

pub mod cookie;
pub mod session;
pub mod state;
pub mod token;

pub use cookie::{
    CookieSettings, ResponseCookies, SameSitePolicy, read_cookie, replace_request_cookie,
};
pub use session::{MemorySessionStore, Session, SessionRegistry, SessionStore};
pub use state::{STATE_BYTES, new_state};
pub use token::TokenRecord;

//! Server-side session storage.
//!
//! A [`SessionStore`] keeps named string maps for a browser, usually keyed by
//! an opaque id carried in a cookie. The redirect engine uses it instead of
//! cookies when `use_session` is enabled, so tokens never reach the browser.
//!
//! Stores are looked up by name in a [`SessionRegistry`] that is built by the
//! caller and handed to the engine builder.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use http::HeaderMap;
use uuid::Uuid;

use super::cookie::{CookieSettings, ResponseCookies, read_cookie};
use crate::AuthResult;
use crate::clock::{Clock, SystemClock};

/// A named bag of string values bound to one browser.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    /// Session name, also the name of the id cookie.
    pub name: String,
    /// Opaque session id.
    pub id: String,
    /// Stored values.
    pub values: HashMap<String, String>,
    /// `true` if the browser presented no existing session.
    pub is_new: bool,
}

impl Session {
    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Stores `value` under `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Removes `key`, returning its previous value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }
}

/// Storage backend for sessions.
#[async_trait]
pub trait SessionStore: Send + Sync + fmt::Debug {
    /// Loads the session `name` for the request, or a fresh empty one.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the backend is unavailable.
    async fn load(&self, headers: &HeaderMap, name: &str) -> AuthResult<Session>;

    /// Persists the session and queues whatever cookie identifies it.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the backend rejects the write.
    async fn save(&self, session: &Session, cookies: &mut ResponseCookies) -> AuthResult<()>;

    /// Deletes the session `name` and expires its cookie.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the backend rejects the delete.
    async fn remove(
        &self,
        headers: &HeaderMap,
        name: &str,
        cookies: &mut ResponseCookies,
    ) -> AuthResult<()>;
}

/// Lifetime of memory sessions when the id cookie is a browser-session cookie.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600); // 1 hour

#[derive(Debug, Clone)]
struct Entry {
    values: HashMap<String, String>,
    expires_at: i64,
}

/// In-process session store for development and tests.
///
/// Values live in a [`DashMap`] keyed by a random UUID that is sent to the
/// browser as the session cookie. Nothing is persisted across restarts.
///
/// Every save pushes the session's expiry `ttl` into the future (the id
/// cookie's `max_age`, or [`DEFAULT_SESSION_TTL`]). Expired sessions load as
/// new and are dropped on the next save, so abandoned logins do not pile up.
#[derive(Debug)]
pub struct MemorySessionStore {
    cookie: CookieSettings,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    sessions: DashMap<String, Entry>,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new(CookieSettings::default())
    }
}

impl MemorySessionStore {
    /// Creates a store whose id cookies use the given settings.
    #[must_use]
    pub fn new(cookie: CookieSettings) -> Self {
        let ttl = u64::try_from(cookie.max_age)
            .ok()
            .filter(|secs| *secs > 0)
            .map_or(DEFAULT_SESSION_TTL, Duration::from_secs);
        Self {
            cookie,
            ttl,
            clock: Arc::new(SystemClock),
            sessions: DashMap::new(),
        }
    }

    /// Overrides how long a saved session lives.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the time source for expiry.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Number of stored sessions, expired ones included until purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if no sessions are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drops expired sessions and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_unix();
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| entry.expires_at > now);
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            tracing::debug!(removed, "Purged expired sessions");
        }
        removed
    }

    fn key(name: &str, id: &str) -> String {
        format!("{name}:{id}")
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, headers: &HeaderMap, name: &str) -> AuthResult<Session> {
        if let Some(id) = read_cookie(headers, name) {
            let key = Self::key(name, &id);
            let now = self.clock.now_unix();
            let live = self
                .sessions
                .get(&key)
                .and_then(|entry| (entry.expires_at > now).then(|| entry.values.clone()));

            match live {
                Some(values) => {
                    return Ok(Session {
                        name: name.to_string(),
                        id,
                        values,
                        is_new: false,
                    });
                }
                None => {
                    self.sessions
                        .remove_if(&key, |_, entry| entry.expires_at <= now);
                }
            }
        }

        Ok(Session {
            name: name.to_string(),
            id: Uuid::new_v4().to_string(),
            values: HashMap::new(),
            is_new: true,
        })
    }

    async fn save(&self, session: &Session, cookies: &mut ResponseCookies) -> AuthResult<()> {
        self.purge_expired();

        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        self.sessions.insert(
            Self::key(&session.name, &session.id),
            Entry {
                values: session.values.clone(),
                expires_at: self.clock.now_unix().saturating_add(ttl),
            },
        );
        cookies.add(self.cookie.build(&session.name, &session.id));
        tracing::trace!(session = %session.name, "Session saved");
        Ok(())
    }

    async fn remove(
        &self,
        headers: &HeaderMap,
        name: &str,
        cookies: &mut ResponseCookies,
    ) -> AuthResult<()> {
        if let Some(id) = read_cookie(headers, name) {
            self.sessions.remove(&Self::key(name, &id));
        }
        cookies.add(self.cookie.removal(name));
        Ok(())
    }
}

/// Named session stores, shared between engines.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    stores: RwLock<HashMap<String, Arc<dyn SessionStore>>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `store` under `name`, replacing any previous store.
    pub fn register(&self, name: impl Into<String>, store: Arc<dyn SessionStore>) {
        let name = name.into();
        tracing::debug!(store = %name, "Registering session store");
        self.stores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, store);
    }

    /// Looks up the store registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn SessionStore>> {
        self.stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Names of all registered stores.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

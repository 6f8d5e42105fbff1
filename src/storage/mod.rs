//! Durable client storage.
//!
//! Two stores back a session: a cookie-like store for tokens and the user
//! record, and a larger key-value store for the encoded avatar. Both are
//! synchronous; callers treat writes as best-effort.

mod file;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use cookie::{Cookie, CookieJar};
use time::Duration;

use crate::error::Error;

pub use file::{FileCookieStore, FileKeyValueStore};

/// Cookie-like store for small values (tokens, serialized user).
pub trait CookieStore: Send + Sync + 'static {
    /// Value of the named cookie, if set.
    fn get(&self, name: &str) -> Option<String>;

    /// Store a cookie. A cookie with a zero max-age removes the entry.
    fn add(&self, cookie: Cookie<'static>) -> Result<(), Error>;

    /// Remove the named cookie set on `path`.
    fn remove(&self, name: &str, path: &str) -> Result<(), Error> {
        self.add(removal_cookie(name, path))
    }
}

/// Key-value store for larger text values (encoded avatar).
pub trait KeyValueStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<(), Error>;

    fn remove(&self, key: &str) -> Result<(), Error>;
}

/// Create a persistent session cookie scoped to `path`.
pub(crate) fn session_cookie(name: &str, value: &str, path: &str, secure: bool) -> Cookie<'static> {
    Cookie::build((name.to_string(), value.to_string()))
        .path(path.to_string())
        .secure(secure)
        .permanent()
        .build()
}

/// Create removal cookie.
pub(crate) fn removal_cookie(name: &str, path: &str) -> Cookie<'static> {
    Cookie::build((name.to_string(), ""))
        .path(path.to_string())
        .max_age(Duration::ZERO)
        .build()
}

pub(crate) fn is_removal(cookie: &Cookie<'_>) -> bool {
    cookie.max_age() == Some(Duration::ZERO)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory cookie store backed by a [`CookieJar`].
#[derive(Debug, Default)]
pub struct MemoryCookieStore {
    jar: Mutex<CookieJar>,
}

impl MemoryCookieStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Full cookie as stored, including its attributes.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<Cookie<'static>> {
        lock(&self.jar).get(name).cloned()
    }
}

impl CookieStore for MemoryCookieStore {
    fn get(&self, name: &str) -> Option<String> {
        lock(&self.jar).get(name).map(|c| c.value().to_string())
    }

    fn add(&self, cookie: Cookie<'static>) -> Result<(), Error> {
        let mut jar = lock(&self.jar);
        if is_removal(&cookie) {
            jar.force_remove(cookie.name().to_string());
        } else {
            jar.add_original(cookie);
        }
        Ok(())
    }
}

/// In-memory key-value store.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), Error> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

//! Session stores.
//!
//! A **store** decides where a session's payload lives and how it is tied to
//! the client:
//! - [`CookieStore`] encodes the whole payload into the cookie.
//! - [`FilesystemStore`] encodes only the session id into the cookie and keeps
//!   the payload in a file on disk.
//!
//! Every store implements [`Store`]. Stores that can pick the right cookie
//! when a request carries several cookies with the same name also implement
//! [`StoreExact`] and advertise it through [`Store::as_exact`]; the
//! [`Registry`] dispatches on that.
//!
//! ## Lookups
//! `get`/`get_exact` go through the request's [`Registry`], so a session is
//! decoded at most once per request. `new_session`/`new_exact` bypass the
//! registry and decode every time they are called.
//!
//! A lookup returns a [`Lookup`]: the session is always usable, and a decode
//! or load failure is reported next to it instead of replacing it. Only fatal
//! problems (an invalid cookie name) are returned as `Err`.
//!
//! ## Example
//! ```rust
//! use gosub_sessions::codec::KeyPair;
//! use gosub_sessions::registry::Registry;
//! use gosub_sessions::store::{CookieStore, Store};
//! use http::HeaderMap;
//!
//! let store = CookieStore::new(&[KeyPair::new(b"secret-key".to_vec())]).unwrap();
//! let registry = Registry::new(HeaderMap::new());
//!
//! let lookup = store.get(&registry, "session").unwrap();
//! lookup.session.write().unwrap().insert("user", 7).unwrap();
//!
//! let mut response = HeaderMap::new();
//! registry.save(&mut response).unwrap();
//! assert!(response.contains_key(http::header::SET_COOKIE));
//! ```
mod cookie_store;
mod filesystem;

use http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::{Arc, PoisonError};
use uuid::Uuid;

use crate::config::Options;
use crate::cookies::is_valid_cookie_name;
use crate::errors::SessionError;
use crate::registry::Registry;
use crate::session::{Session, SessionHandle};

pub use cookie_store::CookieStore;
pub use filesystem::{FilesystemStore, FilesystemStoreBuilder, SessionFileLock};

/// A unique identifier for a store instance. The registry keys cached sessions by it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreId(Uuid);

impl StoreId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StoreId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for StoreId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Display for StoreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A handle to a store trait object.
pub type StoreHandle = Arc<dyn Store>;

/// Picks the right session when a request carries several cookies with the same name.
///
/// Called with each fully decoded candidate, in header order; the first candidate
/// for which it returns `true` wins.
pub type Matcher<'a> = dyn Fn(&Session) -> bool + 'a;

/// Accepts the first candidate.
pub fn first_matcher(_session: &Session) -> bool {
    true
}

/// Result of resolving a session.
///
/// `session` is always usable. `error` carries a non-fatal decode or load failure,
/// in which case the session is empty and marked new.
#[derive(Debug, Clone)]
pub struct Lookup {
    pub session: SessionHandle,
    pub error: Option<SessionError>,
}

impl Lookup {
    pub(crate) fn new(session: Session, error: Option<SessionError>) -> Self {
        Lookup { session: session.into_handle(), error }
    }

    pub fn is_new(&self) -> bool {
        self.session.read().unwrap_or_else(PoisonError::into_inner).is_new
    }

    /// Converts into a `Result`, treating a decode failure as an error.
    pub fn into_result(self) -> Result<SessionHandle, SessionError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.session),
        }
    }
}

/// Interface for session stores.
///
/// Implementations must be `Send + Sync`; default options and codecs are only
/// expected to change during setup, before traffic arrives.
pub trait Store: Send + Sync {
    /// Identity used by the registry to tell stores apart.
    fn id(&self) -> StoreId;

    /// Snapshot of the store's default options.
    fn options(&self) -> Options;

    /// Returns the session cached in `registry`, creating it on first use.
    fn get(&self, registry: &Registry, name: &str) -> Result<Lookup, SessionError>;

    /// Creates or decodes a session without touching any registry.
    ///
    /// Never returns an unusable session: decode failures come back as
    /// [`Lookup::error`] next to a fresh session.
    fn new_session(&self, request: &HeaderMap, name: &str) -> Result<Lookup, SessionError>;

    /// Persists `session` and appends its `Set-Cookie` header to `response`.
    fn save(&self, request: &HeaderMap, response: &mut HeaderMap, session: &mut Session) -> Result<(), SessionError>;

    /// Returns the exact-matching interface if the store supports it.
    fn as_exact(&self) -> Option<&dyn StoreExact> {
        None
    }
}

/// Stores that can choose among several same-named cookies.
pub trait StoreExact: Store {
    /// Like [`Store::new_session`], but walks every cookie called `name` and keeps
    /// the first decoded candidate accepted by `matcher`.
    fn new_exact(&self, request: &HeaderMap, name: &str, matcher: &Matcher<'_>) -> Result<Lookup, SessionError>;

    /// Registry-cached version of [`StoreExact::new_exact`].
    fn get_exact(&self, registry: &Registry, name: &str, matcher: &Matcher<'_>) -> Result<Lookup, SessionError>;
}

pub(crate) fn ensure_valid_name(name: &str) -> Result<(), SessionError> {
    if is_valid_cookie_name(name) {
        Ok(())
    } else {
        Err(SessionError::InvalidCookieName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::KeyPair;

    #[test]
    fn store_ids_are_unique() {
        assert_ne!(StoreId::new(), StoreId::new());
        let uuid = Uuid::new_v4();
        assert_eq!(StoreId::from(uuid).to_string(), uuid.to_string());
    }

    #[test]
    fn both_stores_advertise_exact_support() {
        let cookie: StoreHandle = CookieStore::new(&[KeyPair::new(b"k".to_vec())]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let fs: StoreHandle = FilesystemStore::new(dir.path(), &[KeyPair::new(b"k".to_vec())]).unwrap();

        assert!(cookie.as_exact().is_some());
        assert!(fs.as_exact().is_some());
        assert_eq!(cookie.as_exact().unwrap().id(), cookie.id());
    }

    #[test]
    fn lookup_into_result() {
        let store: StoreHandle = CookieStore::new(&[]).unwrap();
        let ok = Lookup::new(Session::new(&store, "a"), None);
        assert!(ok.is_new());
        assert!(ok.into_result().is_ok());

        let failed = Lookup::new(Session::new(&store, "a"), Some(SessionError::Value("x".into())));
        assert!(matches!(failed.into_result(), Err(SessionError::Value(_))));
    }

    #[test]
    fn first_matcher_accepts_anything() {
        let store: StoreHandle = CookieStore::new(&[]).unwrap();
        assert!(first_matcher(&Session::new(&store, "a")));
    }
}

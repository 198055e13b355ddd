//! Cookie-backed session store.
//!
//! `CookieStore` keeps the **entire session payload** in the cookie. Values are
//! serialized, signed (and optionally encrypted) by the codec chain and sent
//! back to the client on every save. There is no server-side state, so
//! deleting a session (`max_age <= 0`) is expressed purely through the expiry
//! of the emitted cookie.
//!
//! ### Key rotation
//! The store holds an ordered list of codecs built from key pairs. Encoding
//! uses the first codec that succeeds; decoding tries each one in turn, so
//! prepending a new key pair keeps existing cookies readable.
//!
//! ### Concurrency
//! Default options and codecs sit behind `RwLock`s and are meant to be
//! configured during setup. Lookups only take read locks.
use http::HeaderMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, Weak};

use crate::codec::{codecs_from_pairs, decode_multi, encode_multi, Codec, KeyPair};
use crate::config::{Options, DEFAULT_MAX_AGE};
use crate::cookies::{cookie_values, Cookie};
use crate::errors::SessionError;
use crate::registry::Registry;
use crate::session::{Session, Values};
use crate::store::{ensure_valid_name, Lookup, Matcher, Store, StoreExact, StoreId};

/// Stores sessions in signed/encrypted cookies.
pub struct CookieStore {
    id: StoreId,
    codecs: RwLock<Vec<Box<dyn Codec>>>,
    /// Default options copied into every new session.
    options: RwLock<Options>,
    /// Self handle, so sessions can route `save` back to this store.
    store_self: Weak<CookieStore>,
}

impl CookieStore {
    /// Creates a store from key pairs, in rotation order.
    ///
    /// Default options are `Path=/` and a max age of 30 days.
    pub fn new(key_pairs: &[KeyPair]) -> Result<Arc<Self>, SessionError> {
        Ok(Self::with_codecs(codecs_from_pairs(key_pairs)?))
    }

    /// Creates a store from an already built codec chain.
    pub fn with_codecs(codecs: Vec<Box<dyn Codec>>) -> Arc<Self> {
        let store = Arc::new_cyclic(|me| Self {
            id: StoreId::new(),
            codecs: RwLock::new(codecs),
            options: RwLock::new(Options::default()),
            store_self: me.clone(),
        });
        store.set_max_age(DEFAULT_MAX_AGE);
        store
    }

    /// Replaces the default options. Sessions created earlier keep their own copy.
    pub fn set_options(&self, options: Options) {
        *self.options.write().unwrap_or_else(PoisonError::into_inner) = options;
    }

    /// Edits the default options in place.
    pub fn update_options(&self, f: impl FnOnce(&mut Options)) {
        f(&mut self.options.write().unwrap_or_else(PoisonError::into_inner));
    }

    /// Sets the default max age and the age ceiling of every codec.
    ///
    /// Individual sessions can still be deleted by setting their own
    /// `options.max_age` to zero or less.
    pub fn set_max_age(&self, age: i64) {
        self.update_options(|o| o.max_age = age);
        for codec in self.codecs.write().unwrap_or_else(PoisonError::into_inner).iter_mut() {
            codec.set_max_age(age);
        }
    }

    fn codecs(&self) -> RwLockReadGuard<'_, Vec<Box<dyn Codec>>> {
        self.codecs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn create(&self, name: &str) -> Session {
        let store: Weak<dyn Store> = self.store_self.clone();
        Session::with_options(store, name, self.options())
    }

    fn decode_values(&self, name: &str, token: &str) -> Result<Values, SessionError> {
        decode_multi(name, token, &self.codecs()).map_err(SessionError::from)
    }
}

impl Store for CookieStore {
    fn id(&self) -> StoreId {
        self.id
    }

    fn options(&self) -> Options {
        self.options.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn get(&self, registry: &Registry, name: &str) -> Result<Lookup, SessionError> {
        registry.get(self, name)
    }

    /// Decodes the first cookie called `name`, if any.
    fn new_session(&self, request: &HeaderMap, name: &str) -> Result<Lookup, SessionError> {
        ensure_valid_name(name)?;
        let mut session = self.create(name);
        let mut error = None;

        if let Some(token) = cookie_values(request, name).next() {
            match self.decode_values(name, token) {
                Ok(values) => {
                    session.values = values;
                    session.is_new = false;
                }
                Err(e) => {
                    log::debug!("CookieStore[{}]: cannot decode cookie {:?}: {}", self.id, name, e);
                    error = Some(e);
                }
            }
        }

        Ok(Lookup::new(session, error))
    }

    fn save(&self, _request: &HeaderMap, response: &mut HeaderMap, session: &mut Session) -> Result<(), SessionError> {
        ensure_valid_name(session.name())?;
        let encoded = encode_multi(session.name(), &session.values, &self.codecs())?;
        Cookie::from_options(session.name(), &encoded, &session.options).append_to(response)
    }

    fn as_exact(&self) -> Option<&dyn StoreExact> {
        Some(self)
    }
}

impl StoreExact for CookieStore {
    fn new_exact(&self, request: &HeaderMap, name: &str, matcher: &Matcher<'_>) -> Result<Lookup, SessionError> {
        ensure_valid_name(name)?;
        let mut session = self.create(name);
        let mut error = None;

        for token in cookie_values(request, name) {
            match self.decode_values(name, token) {
                Ok(values) => {
                    error = None;
                    session.values = values;
                    if matcher(&session) {
                        session.is_new = false;
                        break;
                    }
                    // Rejected candidates must not leak into the returned session.
                    session.values.clear();
                }
                Err(e) => {
                    log::debug!("CookieStore[{}]: skipping undecodable {:?} cookie: {}", self.id, name, e);
                    error = Some(e);
                }
            }
        }

        Ok(Lookup::new(session, error))
    }

    fn get_exact(&self, registry: &Registry, name: &str, matcher: &Matcher<'_>) -> Result<Lookup, SessionError> {
        registry.get_exact(self, name, matcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::generate_random_key;
    use crate::errors::CodecError;
    use crate::store::{first_matcher, StoreHandle};
    use http::header::{COOKIE, SET_COOKIE};
    use http::HeaderValue;

    fn store() -> Arc<CookieStore> {
        CookieStore::new(&[KeyPair::new(b"secret-key".to_vec())]).unwrap()
    }

    /// Saves a session holding `values` and returns its `name=value` cookie pair.
    fn issue(store: &Arc<CookieStore>, name: &str, values: &[(&str, &str)]) -> String {
        let handle: StoreHandle = store.clone();
        let mut session = Session::new(&handle, name);
        for (k, v) in values {
            session.insert(k, v).unwrap();
        }
        let mut response = HeaderMap::new();
        store.save(&HeaderMap::new(), &mut response, &mut session).unwrap();
        let header = response.get(SET_COOKIE).unwrap().to_str().unwrap();
        header.split(';').next().unwrap().to_string()
    }

    fn request(cookies: &[&str]) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(COOKIE, HeaderValue::from_str(&cookies.join("; ")).unwrap());
        h
    }

    #[test]
    fn new_without_cookie_is_new_and_error_free() {
        let lookup = store().new_session(&HeaderMap::new(), "hello").unwrap();
        assert!(lookup.error.is_none());
        assert!(lookup.is_new());
    }

    #[test]
    fn save_then_decode_restores_values() {
        let store = store();
        let cookie = issue(&store, "sid", &[("user", "ana")]);

        let lookup = store.new_session(&request(&[&cookie]), "sid").unwrap();
        assert!(lookup.error.is_none());
        let session = lookup.session.read().unwrap();
        assert!(!session.is_new);
        assert_eq!(session.get::<String>("user").unwrap().as_deref(), Some("ana"));
    }

    #[test]
    fn undecodable_cookie_yields_usable_new_session_and_error() {
        let lookup = store().new_session(&request(&["sid=garbage"]), "sid").unwrap();
        assert!(lookup.error.as_ref().is_some_and(|e| e.is_decode()));
        let session = lookup.session.read().unwrap();
        assert!(session.is_new);
        assert!(session.values.is_empty());
    }

    #[test]
    fn new_decodes_every_time() {
        let store = store();
        let cookie = issue(&store, "sid", &[("n", "1")]);
        let req = request(&[&cookie]);

        let a = store.new_session(&req, "sid").unwrap();
        let b = store.new_session(&req, "sid").unwrap();
        assert!(!Arc::ptr_eq(&a.session, &b.session));
    }

    #[test]
    fn invalid_name_is_rejected_before_decoding() {
        let store = store();
        assert!(matches!(
            store.new_session(&HeaderMap::new(), "session:key"),
            Err(SessionError::InvalidCookieName(_))
        ));
        assert!(matches!(
            store.new_exact(&HeaderMap::new(), "", &first_matcher),
            Err(SessionError::InvalidCookieName(_))
        ));
    }

    #[test]
    fn options_are_snapshotted_per_session() {
        let store = store();
        store.update_options(|o| o.path = "/".into());
        let lookup = store.new_session(&HeaderMap::new(), "hello").unwrap();

        store.update_options(|o| o.path = "/foo".into());
        assert_eq!(lookup.session.read().unwrap().options.path, "/");
        assert_eq!(store.options().path, "/foo");
    }

    #[test]
    fn exact_match_picks_the_approved_candidate() {
        let store = store();
        let first = issue(&store, "sid", &[("tenant", "a"), ("only_first", "x")]);
        let second = issue(&store, "sid", &[("tenant", "b")]);
        let req = request(&[&first, &second]);

        let tenant_b = |s: &Session| s.get::<String>("tenant").ok().flatten().as_deref() == Some("b");
        let lookup = store.new_exact(&req, "sid", &tenant_b).unwrap();

        assert!(lookup.error.is_none());
        let session = lookup.session.read().unwrap();
        assert!(!session.is_new);
        assert_eq!(session.get::<String>("tenant").unwrap().as_deref(), Some("b"));
        assert!(!session.values.contains_key("only_first"));
    }

    #[test]
    fn exact_match_without_winner_returns_empty_new_session() {
        let store = store();
        let a = issue(&store, "sid", &[("tenant", "a")]);
        let b = issue(&store, "sid", &[("tenant", "b")]);

        let lookup = store.new_exact(&request(&[&a, &b]), "sid", &|_: &Session| false).unwrap();
        let session = lookup.session.read().unwrap();
        assert!(session.is_new);
        assert!(session.values.is_empty());
        assert!(lookup.error.is_none());
    }

    #[test]
    fn exact_match_skips_undecodable_candidates() {
        let store = store();
        let good = issue(&store, "sid", &[("ok", "yes")]);

        let lookup = store.new_exact(&request(&["sid=junk", &good]), "sid", &first_matcher).unwrap();
        assert!(lookup.error.is_none());
        assert!(!lookup.is_new());

        let lookup = store.new_exact(&request(&[&good, "sid=junk"]), "sid", &first_matcher).unwrap();
        assert!(!lookup.is_new());
    }

    #[test]
    fn save_emits_cookie_with_session_options() {
        let store = store();
        let handle: StoreHandle = store.clone();
        let mut session = Session::new(&handle, "sid");
        session.options.path = "/app".into();
        session.options.http_only = true;

        let mut response = HeaderMap::new();
        store.save(&HeaderMap::new(), &mut response, &mut session).unwrap();
        let header = response.get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(header.starts_with("sid="));
        assert!(header.contains("; Path=/app"));
        assert!(header.contains("; HttpOnly"));
    }

    #[test]
    fn expired_session_cookie_expires_immediately() {
        let store = store();
        let handle: StoreHandle = store.clone();
        let mut session = Session::new(&handle, "sid");
        session.options.max_age = -1;

        let mut response = HeaderMap::new();
        store.save(&HeaderMap::new(), &mut response, &mut session).unwrap();
        let header = response.get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(header.contains("Max-Age=0"));
        assert!(header.contains("Expires=Thu, 01 Jan 1970 00:00:01 GMT"));
    }

    #[test]
    fn encode_failure_emits_no_cookie() {
        let store = CookieStore::new(&[]).unwrap();
        let handle: StoreHandle = store.clone();
        let mut session = Session::new(&handle, "sid");

        let mut response = HeaderMap::new();
        let err = store.save(&HeaderMap::new(), &mut response, &mut session).unwrap_err();
        assert!(matches!(err, SessionError::Codec(CodecError::NoCodecs)));
        assert!(response.is_empty());
    }

    #[test]
    fn max_age_propagates_to_store_defaults() {
        let store = store();
        store.set_max_age(120);
        assert_eq!(store.options().max_age, 120);

        let lookup = store.new_session(&HeaderMap::new(), "sid").unwrap();
        store.set_max_age(10);
        assert_eq!(lookup.session.read().unwrap().options.max_age, 120);
    }

    #[test]
    fn encrypted_store_roundtrip_and_key_rotation() {
        let old = KeyPair::with_encryption(generate_random_key(32), generate_random_key(16));
        let legacy = CookieStore::new(&[old.clone()]).unwrap();
        let cookie = issue(&legacy, "sid", &[("k", "v")]);

        let rotated = CookieStore::new(&[
            KeyPair::with_encryption(generate_random_key(32), generate_random_key(32)),
            old,
        ])
        .unwrap();
        let lookup = rotated.new_session(&request(&[&cookie]), "sid").unwrap();
        assert!(lookup.error.is_none());
        assert_eq!(lookup.session.read().unwrap().get::<String>("k").unwrap().as_deref(), Some("v"));
    }
}

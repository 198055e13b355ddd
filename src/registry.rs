//! Request-scoped session registry.
//!
//! A [`Registry`] lives for one request. It remembers every session resolved
//! through it, keyed by store identity and cookie name, so repeated lookups
//! hand back the same [`SessionHandle`] (and the same decode error) without
//! decoding again. At response time [`Registry::save`] persists every
//! registered session in the order it was first resolved.
use http::{HeaderMap, Request};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::errors::SessionError;
use crate::session::SessionHandle;
use crate::store::{ensure_valid_name, first_matcher, Lookup, Matcher, Store, StoreExact, StoreId};

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<(StoreId, String), Lookup>,
    /// Save order.
    order: Vec<SessionHandle>,
}

/// Sessions resolved during a single request.
pub struct Registry {
    request: HeaderMap,
    state: Mutex<RegistryState>,
}

impl Registry {
    /// Creates an empty registry for a request carrying `request` headers.
    pub fn new(request: HeaderMap) -> Self {
        Self { request, state: Mutex::new(RegistryState::default()) }
    }

    /// Creates an empty registry from the headers of `request`.
    pub fn from_request<B>(request: &Request<B>) -> Self {
        Self::new(request.headers().clone())
    }

    /// Headers of the request this registry belongs to.
    pub fn request(&self) -> &HeaderMap {
        &self.request
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the session `name` from `store`, resolving it on first use.
    ///
    /// Stores with exact-match support resolve through
    /// [`StoreExact::new_exact`] with [`first_matcher`]; others through
    /// [`Store::new_session`].
    pub fn get(&self, store: &dyn Store, name: &str) -> Result<Lookup, SessionError> {
        match store.as_exact() {
            Some(exact) => self.get_exact(exact, name, &first_matcher),
            None => self.resolve(store.id(), name, || store.new_session(&self.request, name)),
        }
    }

    /// Like [`Registry::get`], choosing among same-named cookies with `matcher`.
    ///
    /// The matcher only applies on the first lookup; later calls return the
    /// cached session regardless of the matcher passed.
    pub fn get_exact(&self, store: &dyn StoreExact, name: &str, matcher: &Matcher<'_>) -> Result<Lookup, SessionError> {
        self.resolve(store.id(), name, || store.new_exact(&self.request, name, matcher))
    }

    fn resolve(
        &self,
        store: StoreId,
        name: &str,
        create: impl FnOnce() -> Result<Lookup, SessionError>,
    ) -> Result<Lookup, SessionError> {
        ensure_valid_name(name)?;

        let key = (store, name.to_string());
        if let Some(cached) = self.state().sessions.get(&key) {
            log::trace!("Registry: cache hit for {name:?} in store {store}");
            return Ok(cached.clone());
        }

        // Not locked: stores do I/O here and matchers may call back into the registry.
        let lookup = create()?;
        if let Some(err) = &lookup.error {
            log::debug!("Registry: session {name:?} in store {store} resolved with error: {err}");
        }

        let mut state = self.state();
        if let Some(cached) = state.sessions.get(&key) {
            log::trace!("Registry: {name:?} in store {store} was resolved concurrently");
            return Ok(cached.clone());
        }
        state.order.push(lookup.session.clone());
        state.sessions.insert(key, lookup.clone());
        Ok(lookup)
    }

    /// Adds `session` to the save list without caching it for lookups.
    pub fn add_session(&self, session: SessionHandle) {
        self.state().order.push(session);
    }

    /// Persists every registered session, appending one `Set-Cookie` each to `response`.
    ///
    /// A failing session does not stop the others; every failure is reported,
    /// tagged with its session name.
    pub fn save(&self, response: &mut HeaderMap) -> Result<(), SessionError> {
        let sessions = self.sessions();
        let mut errors = Vec::new();

        for handle in sessions {
            let mut session = handle.write().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = session.save(&self.request, response) {
                log::debug!("Registry: failed to save session {:?}: {}", session.name(), e);
                errors.push(SessionError::Save { name: session.name().to_string(), source: Box::new(e) });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SessionError::Multiple(errors))
        }
    }

    /// Registered sessions in save order.
    pub fn sessions(&self) -> Vec<SessionHandle> {
        self.state().order.clone()
    }

    pub fn len(&self) -> usize {
        self.state().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().order.is_empty()
    }

    /// Drops every cached session.
    pub fn clear(&self) {
        let mut state = self.state();
        state.sessions.clear();
        state.order.clear();
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("sessions", &self.len()).finish()
    }
}

//! Hangs a [`Registry`] on an [`http::Request`].
//!
//! The registry is kept in the request's extensions map as a [`RegistryHandle`],
//! so it travels with the request through `into_parts`/`from_parts` and is
//! dropped together with it. Handlers that only have the request can resolve
//! sessions with [`get_session`] and persist them with [`save`].
use http::{HeaderMap, Request, Response};
use std::sync::Arc;

use crate::errors::SessionError;
use crate::registry::Registry;
use crate::store::{Lookup, Store};

pub type RegistryHandle = Arc<Registry>;

/// Access to the per-request session registry.
pub trait RequestSessionsExt {
    /// Returns the request's registry, creating it on first access.
    fn session_registry(&mut self) -> RegistryHandle;

    /// Returns the registry if one was created for this request.
    fn existing_session_registry(&self) -> Option<RegistryHandle>;

    /// Detaches the registry from the request.
    fn clear_session_registry(&mut self) -> Option<RegistryHandle>;
}

impl<B> RequestSessionsExt for Request<B> {
    fn session_registry(&mut self) -> RegistryHandle {
        if let Some(registry) = self.extensions().get::<RegistryHandle>() {
            return registry.clone();
        }
        let registry = Arc::new(Registry::from_request(self));
        self.extensions_mut().insert(registry.clone());
        log::trace!("context: attached session registry to {} {}", self.method(), self.uri());
        registry
    }

    fn existing_session_registry(&self) -> Option<RegistryHandle> {
        self.extensions().get::<RegistryHandle>().cloned()
    }

    fn clear_session_registry(&mut self) -> Option<RegistryHandle> {
        self.extensions_mut().remove::<RegistryHandle>()
    }
}

/// Resolves session `name` from `store` through the request's registry.
pub fn get_session<B>(request: &mut Request<B>, store: &dyn Store, name: &str) -> Result<Lookup, SessionError> {
    let registry = request.session_registry();
    store.get(&registry, name)
}

/// Saves every session resolved for `request` into `response` headers.
///
/// A request that never touched a session has nothing to save.
pub fn save<B>(request: &Request<B>, response: &mut HeaderMap) -> Result<(), SessionError> {
    match request.existing_session_registry() {
        Some(registry) => registry.save(response),
        None => Ok(()),
    }
}

/// Same as [`save`], writing into a full response.
pub fn save_response<B, R>(request: &Request<B>, response: &mut Response<R>) -> Result<(), SessionError> {
    save(request, response.headers_mut())
}

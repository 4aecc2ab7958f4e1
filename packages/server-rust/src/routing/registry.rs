//! Concurrent registry of compiled routes keyed by operation.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use switchyard_core::{BridgeError, OperationKey};
use tracing::{debug, error};

use super::route::Route;

/// Misuse of the registry by the component managing it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("a route is already registered for {0}")]
    AlreadyRegistered(OperationKey),
    #[error("no route is registered for {0}")]
    NotRegistered(OperationKey),
}

/// Read-mostly map from operation key to route.
///
/// Routes are fully built before they are registered, and a registration is
/// one atomic insert of an `Arc`, so a lookup never sees a partial route.
#[derive(Debug, Default)]
pub struct RouteRegistry {
    routes: DashMap<OperationKey, Arc<Route>>,
}

impl RouteRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `route` under its key.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::AlreadyRegistered` if the key is taken; the
    /// existing route is left in place.
    pub fn register(&self, route: Arc<Route>) -> Result<(), RegistryError> {
        let key = route.key().clone();
        match self.routes.entry(key) {
            Entry::Occupied(occupied) => {
                error!(
                    key = %occupied.key(),
                    existing = occupied.get().id(),
                    rejected = route.id(),
                    "duplicate route registration"
                );
                Err(RegistryError::AlreadyRegistered(occupied.key().clone()))
            }
            Entry::Vacant(vacant) => {
                debug!(key = %vacant.key(), route = route.id(), "route registered");
                vacant.insert(route);
                Ok(())
            }
        }
    }

    /// Removes and returns the route registered under `key`.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotRegistered` if no route is registered.
    pub fn unregister(&self, key: &OperationKey) -> Result<Arc<Route>, RegistryError> {
        match self.routes.remove(key) {
            Some((_, route)) => {
                debug!(key = %key, route = route.id(), "route unregistered");
                Ok(route)
            }
            None => {
                error!(key = %key, "unregistering an absent route");
                Err(RegistryError::NotRegistered(key.clone()))
            }
        }
    }

    /// Finds the route answering `key`.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::RouteNotFound`, an expected runtime condition
    /// the caller reports on the exchange.
    pub fn lookup(&self, key: &OperationKey) -> Result<Arc<Route>, BridgeError> {
        self.routes
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| BridgeError::RouteNotFound(key.clone()))
    }

    #[must_use]
    pub fn contains(&self, key: &OperationKey) -> bool {
        self.routes.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

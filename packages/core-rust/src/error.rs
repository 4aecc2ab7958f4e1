//! Expected-runtime error taxonomy carried on exchanges.
//!
//! These errors never crash a dispatching worker: they are attached to the
//! relevant exchange and reported to its originator.

use std::sync::{Arc, LazyLock};

use crate::exchange::Role;
use crate::key::OperationKey;

/// Shared timeout value. Timeouts are frequent and expected, so every timeout
/// event reuses this one allocation.
static TIMEOUT: LazyLock<Arc<BridgeError>> = LazyLock::new(|| Arc::new(BridgeError::Timeout));

/// Errors attached to an exchange when it cannot be routed or answered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("no route is registered for {0}")]
    RouteNotFound(OperationKey),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("unknown message exchange pattern: {0}")]
    UnknownMep(String),
    #[error("exchange {exchange_id} must have the provider role, got {role}")]
    RoleMismatch { exchange_id: String, role: Role },
    #[error("a timeout happened while sending an exchange to a service")]
    Timeout,
    #[error("too many exchanges in flight, try again later")]
    Overloaded,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("route failure: {0}")]
    Route(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Returns the process-wide timeout error.
    #[must_use]
    pub fn timeout() -> Arc<Self> {
        Arc::clone(&TIMEOUT)
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

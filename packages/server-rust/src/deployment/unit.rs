//! Deployment unit and its lifecycle state machine.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::placeholders::Placeholders;
use crate::routing::{DispatchProducer, RegistryError, Route};

/// Lifecycle state of a deployment unit.
///
/// State machine:
/// `Deployed -> Initialized -> Started <-> Stopped -> Shutdown -> Undeployed`,
/// with `Shutdown -> Initialized` allowed for a re-init.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitState {
    Deployed,
    Initialized,
    Started,
    Stopped,
    Shutdown,
    Undeployed,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Deployed => "deployed",
            Self::Initialized => "initialized",
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Shutdown => "shutdown",
            Self::Undeployed => "undeployed",
        };
        f.write_str(name)
    }
}

/// External lifecycle commands, other than `deploy` which creates the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleCommand {
    Init,
    Start,
    Stop,
    Shutdown,
    Undeploy,
}

impl fmt::Display for LifecycleCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Shutdown => "shutdown",
            Self::Undeploy => "undeploy",
        };
        f.write_str(name)
    }
}

impl UnitState {
    /// State reached by applying `command`, or `None` if the transition is invalid.
    #[must_use]
    pub fn apply(self, command: LifecycleCommand) -> Option<Self> {
        use LifecycleCommand as C;
        match (self, command) {
            (Self::Deployed | Self::Shutdown, C::Init) => Some(Self::Initialized),
            (Self::Initialized | Self::Stopped, C::Start) => Some(Self::Started),
            (Self::Started, C::Stop) => Some(Self::Stopped),
            (Self::Initialized | Self::Stopped, C::Shutdown) => Some(Self::Shutdown),
            (Self::Deployed | Self::Shutdown, C::Undeploy) => Some(Self::Undeployed),
            _ => None,
        }
    }

    /// Whether the unit's routes are in the registry.
    #[must_use]
    pub fn is_live(self) -> bool {
        self == Self::Started
    }
}

/// Lifecycle failures. `Configuration` covers descriptors that cannot be
/// built into routes; the rest indicate a misbehaving caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("unknown deployment unit {0}")]
    UnknownUnit(String),
    #[error("deployment unit {0} is already deployed")]
    AlreadyDeployed(String),
    #[error("cannot {command} deployment unit {unit} while {from}")]
    InvalidTransition {
        unit: String,
        from: UnitState,
        command: LifecycleCommand,
    },
    #[error("deployment unit {unit}: {reason}")]
    Configuration { unit: String, reason: String },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// One deployed unit: its routes, consumed operations, and placeholders.
pub struct DeploymentUnit {
    name: String,
    state: UnitState,
    routes: Vec<Arc<Route>>,
    producers: Arc<HashMap<String, Arc<DispatchProducer>>>,
    placeholders: Arc<ArcSwap<Placeholders>>,
}

impl fmt::Debug for DeploymentUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentUnit")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("routes", &self.routes.len())
            .field("consumes", &self.producers.len())
            .finish_non_exhaustive()
    }
}

impl DeploymentUnit {
    pub(crate) fn new(
        name: String,
        routes: Vec<Arc<Route>>,
        producers: Arc<HashMap<String, Arc<DispatchProducer>>>,
        placeholders: Arc<ArcSwap<Placeholders>>,
    ) -> Self {
        Self {
            name,
            state: UnitState::Deployed,
            routes,
            producers,
            placeholders,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn state(&self) -> UnitState {
        self.state
    }

    #[must_use]
    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    /// Current placeholder snapshot seen by this unit's routes.
    #[must_use]
    pub fn placeholders(&self) -> Arc<Placeholders> {
        self.placeholders.load_full()
    }

    pub(crate) fn set_placeholders(&self, placeholders: Arc<Placeholders>) {
        self.placeholders.store(placeholders);
    }

    /// Checks that `command` is valid in the current state and returns the
    /// state it leads to, without changing anything.
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError::InvalidTransition` otherwise.
    pub fn check(&self, command: LifecycleCommand) -> Result<UnitState, LifecycleError> {
        self.state
            .apply(command)
            .ok_or_else(|| LifecycleError::InvalidTransition {
                unit: self.name.clone(),
                from: self.state,
                command,
            })
    }

    pub(crate) fn set_state(&mut self, state: UnitState) {
        self.state = state;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [UnitState; 6] = [
        UnitState::Deployed,
        UnitState::Initialized,
        UnitState::Started,
        UnitState::Stopped,
        UnitState::Shutdown,
        UnitState::Undeployed,
    ];

    const ALL_COMMANDS: [LifecycleCommand; 5] = [
        LifecycleCommand::Init,
        LifecycleCommand::Start,
        LifecycleCommand::Stop,
        LifecycleCommand::Shutdown,
        LifecycleCommand::Undeploy,
    ];

    #[test]
    fn full_lifecycle_path() {
        let mut state = UnitState::Deployed;
        for command in [
            LifecycleCommand::Init,
            LifecycleCommand::Start,
            LifecycleCommand::Stop,
            LifecycleCommand::Start,
            LifecycleCommand::Stop,
            LifecycleCommand::Shutdown,
            LifecycleCommand::Init,
            LifecycleCommand::Shutdown,
            LifecycleCommand::Undeploy,
        ] {
            state = state.apply(command).unwrap();
        }
        assert_eq!(state, UnitState::Undeployed);
    }

    #[test]
    fn undeployed_is_terminal() {
        for command in ALL_COMMANDS {
            assert_eq!(UnitState::Undeployed.apply(command), None);
        }
    }

    #[test]
    fn only_started_is_live() {
        for state in ALL_STATES {
            assert_eq!(state.is_live(), state == UnitState::Started);
        }
    }

    #[test]
    fn started_accepts_only_stop() {
        for command in ALL_COMMANDS {
            let next = UnitState::Started.apply(command);
            if command == LifecycleCommand::Stop {
                assert_eq!(next, Some(UnitState::Stopped));
            } else {
                assert_eq!(next, None);
            }
        }
    }

    #[test]
    fn invalid_transition_message() {
        let err = LifecycleError::InvalidTransition {
            unit: "su".to_string(),
            from: UnitState::Deployed,
            command: LifecycleCommand::Start,
        };
        assert_eq!(err.to_string(), "cannot start deployment unit su while deployed");
    }
}

//! Deployment unit manager: builds units from descriptors, drives their
//! lifecycle, and mediates their routes' registration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use switchyard_core::{Mep, Transport};
use tracing::{debug, error, info, warn};

use super::catalog::ProcessorCatalog;
use super::descriptor::{ConsumesDescriptor, DescriptorProvider, UnitDescriptor};
use super::placeholders::Placeholders;
use super::unit::{DeploymentUnit, LifecycleCommand, LifecycleError, UnitState};
use crate::config::ExecutionMode;
use crate::correlation::CorrelationStore;
use crate::routing::{
    DispatchProducer, OperationRecord, ProducerSettings, Route, RouteContext, RouteRegistry,
    ServiceEndpointOperation,
};

/// Defaults applied when building units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeploymentSettings {
    /// Pipeline-wide mode; a route flagged `synchronous` forces `Synchronous`.
    pub execution_mode: ExecutionMode,
    /// Timeout of consumed operations whose declaration sets none.
    pub default_send_timeout: Duration,
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::Asynchronous,
            default_send_timeout: Duration::from_secs(30),
        }
    }
}

/// Owns every deployment unit, one per name.
///
/// Commands on one unit are serialized by that unit's lock; commands on
/// different units proceed independently.
pub struct DeploymentManager {
    registry: Arc<RouteRegistry>,
    store: Arc<CorrelationStore>,
    transport: Arc<dyn Transport>,
    catalog: Arc<ProcessorCatalog>,
    settings: DeploymentSettings,
    placeholders: ArcSwap<Placeholders>,
    units: DashMap<String, Arc<Mutex<DeploymentUnit>>>,
}

impl std::fmt::Debug for DeploymentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentManager")
            .field("units", &self.units.len())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl DeploymentManager {
    #[must_use]
    pub fn new(
        registry: Arc<RouteRegistry>,
        store: Arc<CorrelationStore>,
        transport: Arc<dyn Transport>,
        catalog: Arc<ProcessorCatalog>,
        settings: DeploymentSettings,
    ) -> Self {
        Self {
            registry,
            store,
            transport,
            catalog,
            settings,
            placeholders: ArcSwap::from_pointee(Placeholders::default()),
            units: DashMap::new(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<RouteRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn state(&self, unit: &str) -> Option<UnitState> {
        self.units.get(unit).map(|entry| entry.value().lock().state())
    }

    /// Names of all deployed units, sorted.
    #[must_use]
    pub fn unit_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.units.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Current placeholder snapshot of a unit.
    #[must_use]
    pub fn unit_placeholders(&self, unit: &str) -> Option<Arc<Placeholders>> {
        self.units.get(unit).map(|entry| entry.value().lock().placeholders())
    }

    // -- deploy / undeploy ---------------------------------------------------

    /// Builds a unit from `descriptor` and stores it in the `Deployed` state.
    ///
    /// # Errors
    ///
    /// - `AlreadyDeployed` if a unit with that name exists.
    /// - `Configuration` if an operation has an unknown MEP, no mapped route,
    ///   a route that cannot answer its MEP, or shares its key with another
    ///   operation of the unit; or if a consumes declaration is invalid.
    pub fn deploy(&self, descriptor: UnitDescriptor) -> Result<(), LifecycleError> {
        let name = descriptor.name.clone();
        if self.units.contains_key(&name) {
            return Err(LifecycleError::AlreadyDeployed(name));
        }

        let unit = self.build_unit(&descriptor).inspect_err(|err| {
            warn!(unit = %name, error = %err, "deployment rejected");
        })?;
        let routes = unit.routes().len();

        match self.units.entry(name.clone()) {
            Entry::Occupied(_) => Err(LifecycleError::AlreadyDeployed(name)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(unit)));
                info!(unit = %name, routes, "unit deployed");
                Ok(())
            }
        }
    }

    /// Loads the descriptor of `unit` from `provider` and deploys it.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor cannot be loaded or deployed.
    pub async fn deploy_from(
        &self,
        provider: &dyn DescriptorProvider,
        unit: &str,
    ) -> anyhow::Result<()> {
        let descriptor = provider.load(unit).await?;
        self.deploy(descriptor)?;
        Ok(())
    }

    /// Removes a unit. A unit that was never (successfully) deployed is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if the unit is neither `Deployed` nor `Shutdown`.
    pub fn undeploy(&self, unit: &str) -> Result<(), LifecycleError> {
        let Some(handle) = self.handle(unit) else {
            debug!(unit, "undeploy of an unknown unit ignored");
            return Ok(());
        };
        {
            let mut guard = handle.lock();
            let next = guard.check(LifecycleCommand::Undeploy)?;
            guard.set_state(next);
        }
        self.units.remove(unit);
        info!(unit, "unit undeployed");
        Ok(())
    }

    // -- init / shutdown -----------------------------------------------------

    /// Initializes a unit, refreshing its placeholders first.
    ///
    /// # Errors
    ///
    /// Returns `UnknownUnit` or `InvalidTransition`.
    pub fn init(&self, unit: &str) -> Result<(), LifecycleError> {
        let handle = self.require(unit)?;
        let mut guard = handle.lock();
        let next = guard.check(LifecycleCommand::Init)?;
        guard.set_placeholders(self.placeholders.load_full());
        guard.set_state(next);
        info!(unit, "unit initialized");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `UnknownUnit` or `InvalidTransition`.
    pub fn shutdown(&self, unit: &str) -> Result<(), LifecycleError> {
        let handle = self.require(unit)?;
        let mut guard = handle.lock();
        let next = guard.check(LifecycleCommand::Shutdown)?;
        guard.set_state(next);
        info!(unit, "unit shut down");
        Ok(())
    }

    // -- start / stop ----------------------------------------------------------

    /// Registers every route of the unit.
    ///
    /// Routes are registered one at a time. If one fails, those already
    /// registered are removed again and the unit keeps its state.
    ///
    /// # Errors
    ///
    /// Returns `UnknownUnit`, `InvalidTransition`, or `Registry` when a key
    /// is already taken by another unit.
    pub fn start(&self, unit: &str) -> Result<(), LifecycleError> {
        let handle = self.require(unit)?;
        let mut guard = handle.lock();
        let next = guard.check(LifecycleCommand::Start)?;

        let routes = guard.routes();
        let count = routes.len();
        for (index, route) in routes.iter().enumerate() {
            if let Err(err) = self.registry.register(Arc::clone(route)) {
                error!(unit, key = %route.key(), "route registration failed; rolling back");
                for registered in &routes[..index] {
                    if let Err(rollback) = self.registry.unregister(registered.key()) {
                        error!(unit, error = %rollback, "rollback failed");
                    }
                }
                return Err(err.into());
            }
        }

        guard.set_state(next);
        info!(unit, routes = count, "unit started");
        Ok(())
    }

    /// Unregisters every route of the unit.
    ///
    /// In-flight asynchronous calls made by those routes are left alone; they
    /// still resolve by answer or deadline. Every route is unregistered even
    /// if one fails; the unit is `Stopped` afterwards either way.
    ///
    /// # Errors
    ///
    /// Returns `UnknownUnit`, `InvalidTransition`, or the first `Registry` error.
    pub fn stop(&self, unit: &str) -> Result<(), LifecycleError> {
        let handle = self.require(unit)?;
        let mut guard = handle.lock();
        let next = guard.check(LifecycleCommand::Stop)?;

        let mut first_error = None;
        for route in guard.routes() {
            if let Err(err) = self.registry.unregister(route.key()) {
                error!(unit, error = %err, "route unregistration failed");
                first_error.get_or_insert(err);
            }
        }

        guard.set_state(next);
        info!(unit, "unit stopped");
        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    // -- placeholders ----------------------------------------------------------

    /// Replaces the placeholder values and pushes them to every deployed unit,
    /// without redeploying anything. Started units see them on their next
    /// exchange.
    pub fn reload_placeholders(&self, placeholders: Placeholders) {
        let placeholders = Arc::new(placeholders);
        self.placeholders.store(Arc::clone(&placeholders));
        let mut live = 0;
        for entry in &self.units {
            let unit = entry.value().lock();
            unit.set_placeholders(Arc::clone(&placeholders));
            if unit.state().is_live() {
                live += 1;
            }
        }
        info!(
            units = self.units.len(),
            live,
            values = placeholders.len(),
            "placeholders reloaded"
        );
    }

    // -- draining --------------------------------------------------------------

    /// Drives every unit to `Undeployed`: stop, shutdown, then undeploy, as
    /// the unit's state requires. Errors are logged and the next unit is
    /// processed.
    pub fn drain(&self) {
        for unit in self.unit_names() {
            let result = self.drain_unit(&unit);
            if let Err(err) = result {
                error!(unit = %unit, error = %err, "unit could not be drained");
            }
        }
    }

    fn drain_unit(&self, unit: &str) -> Result<(), LifecycleError> {
        loop {
            let Some(state) = self.state(unit) else {
                return Ok(());
            };
            match state {
                UnitState::Started => self.stop(unit)?,
                UnitState::Initialized | UnitState::Stopped => self.shutdown(unit)?,
                UnitState::Deployed | UnitState::Shutdown | UnitState::Undeployed => {
                    return self.undeploy(unit);
                }
            }
        }
    }

    // -- building --------------------------------------------------------------

    fn handle(&self, unit: &str) -> Option<Arc<Mutex<DeploymentUnit>>> {
        self.units.get(unit).map(|entry| Arc::clone(entry.value()))
    }

    fn require(&self, unit: &str) -> Result<Arc<Mutex<DeploymentUnit>>, LifecycleError> {
        self.handle(unit)
            .ok_or_else(|| LifecycleError::UnknownUnit(unit.to_string()))
    }

    fn build_unit(&self, descriptor: &UnitDescriptor) -> Result<DeploymentUnit, LifecycleError> {
        let unit = descriptor.name.clone();
        let config_error = |reason: String| LifecycleError::Configuration {
            unit: unit.clone(),
            reason,
        };

        let placeholders = Arc::new(ArcSwap::new(self.placeholders.load_full()));

        let mut producers = HashMap::new();
        for consumes in &descriptor.consumes {
            if producers.contains_key(&consumes.id) {
                return Err(config_error(format!(
                    "consumed operation {} is declared twice",
                    consumes.id
                )));
            }
            let producer = self.build_producer(consumes).map_err(&config_error)?;
            producers.insert(consumes.id.clone(), Arc::new(producer));
        }
        let producers = Arc::new(producers);

        let mut routes: Vec<Arc<Route>> = Vec::new();
        for provides in &descriptor.provides {
            for operation in &provides.operations {
                let mep = operation.mep.parse::<Mep>().map_err(|err| {
                    config_error(format!("operation {}: {err}", operation.name))
                })?;
                let endpoint = ServiceEndpointOperation::provides(
                    provides.interface.clone(),
                    provides.service.clone(),
                    provides.endpoint.clone(),
                    operation.name.clone(),
                    mep,
                );
                let Some(key) = endpoint.key() else {
                    return Err(config_error(format!(
                        "operation {} has no complete key",
                        operation.name
                    )));
                };
                if routes.iter().any(|route| route.key() == &key) {
                    return Err(config_error(format!("operation {key} is provided twice")));
                }

                let route_name = operation.route.as_deref().ok_or_else(|| {
                    config_error(format!("no route is mapped for operation {key}"))
                })?;
                let processor = self.catalog.get(route_name).ok_or_else(|| {
                    config_error(format!("route {route_name} of operation {key} is unknown"))
                })?;
                if !processor.supports(mep) {
                    return Err(config_error(format!(
                        "route {route_name} cannot answer {mep} operation {key}"
                    )));
                }

                let route_mode = if operation.synchronous {
                    ExecutionMode::Synchronous
                } else {
                    ExecutionMode::Asynchronous
                };
                let ctx = RouteContext::new(
                    unit.as_str(),
                    route_name,
                    route_mode.combine(self.settings.execution_mode),
                    Arc::clone(&producers),
                    operation.properties.clone(),
                    Arc::clone(&placeholders),
                    Arc::clone(&self.transport),
                );
                debug!(unit = %unit, key = %key, route = route_name, %mep, "route built");
                routes.push(Arc::new(Route::new(
                    route_name,
                    key,
                    mep,
                    operation.synchronous,
                    processor,
                    ctx,
                )));
            }
        }

        Ok(DeploymentUnit::new(
            unit,
            routes,
            producers,
            placeholders,
        ))
    }

    fn build_producer(&self, consumes: &ConsumesDescriptor) -> Result<DispatchProducer, String> {
        // A missing MEP is allowed here; calls then fail before sending.
        let mep = consumes
            .mep
            .as_deref()
            .map(str::parse::<Mep>)
            .transpose()
            .map_err(|err| format!("consumed operation {}: {err}", consumes.id))?;
        let endpoint = ServiceEndpointOperation::consumes(OperationRecord {
            interface: consumes.interface.clone(),
            service: consumes.service.clone(),
            endpoint: consumes.endpoint.clone(),
            operation: consumes.operation.clone(),
            mep,
        });
        let settings = ProducerSettings {
            synchronous: consumes.synchronous,
            timeout: consumes
                .timeout_ms
                .map_or(self.settings.default_send_timeout, Duration::from_millis),
        };
        Ok(DispatchProducer::new(
            endpoint,
            settings,
            Arc::clone(&self.transport),
            Arc::clone(&self.store),
        ))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

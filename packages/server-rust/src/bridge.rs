//! The exchange bridge: wires the registry, correlation store, deployment
//! manager and inbound pipeline together around one transport.
//!
//! Follows a deferred startup pattern:
//! 1. `new()` -- allocates shared state; units can be deployed right away
//! 2. `start()` -- spawns the correlation sweeper (needs a tokio runtime)
//! 3. `shutdown()` -- drains every unit and stops the sweeper

use std::sync::Arc;

use switchyard_core::{Exchange, Transport};
use tower::ServiceExt;
use tracing::{error, info};

use crate::config::BridgeConfig;
use crate::correlation::sweeper::{CorrelationSweeper, SweepTask};
use crate::correlation::CorrelationStore;
use crate::deployment::{DeploymentManager, DeploymentSettings, ProcessorCatalog};
use crate::dispatch::{build_inbound_pipeline, Dispatch, InboundDispatcher, InboundService};
use crate::logging::init_tracing;
use crate::routing::RouteRegistry;
use crate::worker::BackgroundWorker;

pub struct Bridge {
    config: BridgeConfig,
    registry: Arc<RouteRegistry>,
    store: Arc<CorrelationStore>,
    transport: Arc<dyn Transport>,
    deployments: Arc<DeploymentManager>,
    inbound: InboundService,
    sweeper: Option<BackgroundWorker<CorrelationSweeper>>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("routes", &self.registry.len())
            .field("in_flight", &self.store.len())
            .field("deployments", &self.deployments)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Bridge {
    #[must_use]
    pub fn new(
        config: BridgeConfig,
        transport: Arc<dyn Transport>,
        catalog: Arc<ProcessorCatalog>,
    ) -> Self {
        let registry = Arc::new(RouteRegistry::new());
        let store = Arc::new(CorrelationStore::new());
        let deployments = Arc::new(DeploymentManager::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            Arc::clone(&transport),
            catalog,
            DeploymentSettings {
                execution_mode: config.execution_mode,
                default_send_timeout: config.default_send_timeout,
            },
        ));
        let inbound =
            build_inbound_pipeline(InboundDispatcher::new(Arc::clone(&registry)), &config);

        Self {
            config,
            registry,
            store,
            transport,
            deployments,
            inbound,
            sweeper: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> Arc<RouteRegistry> {
        Arc::clone(&self.registry)
    }

    #[must_use]
    pub fn correlation_store(&self) -> Arc<CorrelationStore> {
        Arc::clone(&self.store)
    }

    #[must_use]
    pub fn deployments(&self) -> Arc<DeploymentManager> {
        Arc::clone(&self.deployments)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.sweeper.as_ref().is_some_and(BackgroundWorker::is_running)
    }

    /// Installs the global tracing subscriber described by `config.log`.
    ///
    /// # Errors
    ///
    /// Returns an error if the filter directives are invalid or a global
    /// subscriber is already installed.
    pub fn init_logging(&self) -> anyhow::Result<()> {
        init_tracing(&self.config.log)
    }

    /// Spawns the correlation sweeper. Calling it twice is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) {
        if self.sweeper.is_some() {
            return;
        }
        let sweeper = CorrelationSweeper::new(Arc::clone(&self.store), self.config.sweep_grace);
        self.sweeper = Some(BackgroundWorker::start(sweeper, self.config.sweep_interval));
        info!(
            execution_mode = ?self.config.execution_mode,
            max_concurrent_exchanges = self.config.max_concurrent_exchanges,
            "bridge started"
        );
    }

    /// Runs an inbound exchange through the pipeline.
    pub async fn on_inbound_exchange(&self, exchange: Exchange) -> Dispatch {
        match self.inbound.clone().oneshot(exchange).await {
            Ok(dispatch) => dispatch,
            Err(never) => match never {},
        }
    }

    /// Dispatches an inbound exchange and sends the answer back through the
    /// transport when no route took it. Returns whether it was handled by
    /// a route (or discarded).
    pub async fn deliver(&self, exchange: Exchange) -> bool {
        let dispatch = self.on_inbound_exchange(exchange).await;
        let handled_here = dispatch.handled_here();
        if let Some(answer) = dispatch.auto_answer() {
            let exchange_id = answer.id().to_string();
            if let Err(err) = self.transport.send_answer(answer) {
                error!(exchange_id = %exchange_id, error = %err, "error answer could not be sent");
            }
        }
        handled_here
    }

    /// Asks the sweeper to run now rather than on its next tick.
    ///
    /// # Errors
    ///
    /// Returns an error if the bridge is not running.
    pub async fn sweep_now(&self) -> anyhow::Result<()> {
        match &self.sweeper {
            Some(sweeper) => sweeper.submit(SweepTask::SweepNow).await,
            None => Err(anyhow::anyhow!("bridge not started")),
        }
    }

    /// Drains every deployment unit and stops the sweeper.
    ///
    /// In-flight asynchronous calls keep their deadline timers and still
    /// resolve after this returns.
    pub async fn shutdown(&mut self) {
        self.deployments.drain();
        if let Some(mut sweeper) = self.sweeper.take() {
            sweeper.stop().await;
        }
        info!(in_flight = self.store.len(), "bridge shut down");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

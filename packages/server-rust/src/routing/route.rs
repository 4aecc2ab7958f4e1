//! Routes: the processing pipeline bound to one provided operation.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use futures_util::FutureExt;
use switchyard_core::{BridgeError, EndpointRef, Exchange, Mep, OperationKey, Transport};
use tracing::{debug, error, warn};

use super::conversions::{populate_inbound_answer, route_exchange_from_inbound};
use super::endpoint::EndpointChannel;
use super::exchange::{Completion, RouteExchange};
use super::producer::DispatchProducer;
use crate::config::ExecutionMode;
use crate::deployment::placeholders::Placeholders;

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// User-supplied pipeline logic of a route.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Whether this processor can answer exchanges of the given pattern.
    fn supports(&self, _mep: Mep) -> bool {
        true
    }

    /// Processes one exchange. The returned completion carries the result:
    /// an out message, a fault, or a failure.
    async fn process(&self, exchange: RouteExchange, ctx: &RouteContext) -> Completion;
}

/// Processor that transforms the exchange in place and completes synchronously.
pub struct FnProcessor<F> {
    f: F,
}

impl<F> FnProcessor<F>
where
    F: Fn(&mut RouteExchange, &RouteContext) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Processor for FnProcessor<F>
where
    F: Fn(&mut RouteExchange, &RouteContext) + Send + Sync,
{
    async fn process(&self, mut exchange: RouteExchange, ctx: &RouteContext) -> Completion {
        (self.f)(&mut exchange, ctx);
        Completion::Sync(exchange)
    }
}

/// Processor that forwards the exchange to a consumed operation and answers
/// with whatever that operation answered.
#[derive(Debug, Clone)]
pub struct ForwardProcessor {
    consumes: String,
}

impl ForwardProcessor {
    pub fn new(consumes: impl Into<String>) -> Self {
        Self {
            consumes: consumes.into(),
        }
    }
}

#[async_trait]
impl Processor for ForwardProcessor {
    async fn process(&self, exchange: RouteExchange, ctx: &RouteContext) -> Completion {
        ctx.call(&self.consumes, exchange).await
    }
}

// ---------------------------------------------------------------------------
// RouteContext
// ---------------------------------------------------------------------------

/// What a running route can reach: its unit's consumes declarations,
/// its properties, the unit's placeholders, and the bus.
#[derive(Clone)]
pub struct RouteContext {
    unit: Arc<str>,
    route_id: Arc<str>,
    mode: ExecutionMode,
    producers: Arc<HashMap<String, Arc<DispatchProducer>>>,
    properties: Arc<HashMap<String, String>>,
    placeholders: Arc<ArcSwap<Placeholders>>,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for RouteContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteContext")
            .field("unit", &self.unit)
            .field("route_id", &self.route_id)
            .field("mode", &self.mode)
            .field("consumes", &self.producers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl RouteContext {
    #[must_use]
    pub fn new(
        unit: impl Into<Arc<str>>,
        route_id: impl Into<Arc<str>>,
        mode: ExecutionMode,
        producers: Arc<HashMap<String, Arc<DispatchProducer>>>,
        properties: HashMap<String, String>,
        placeholders: Arc<ArcSwap<Placeholders>>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            unit: unit.into(),
            route_id: route_id.into(),
            mode,
            producers,
            properties: Arc::new(properties),
            placeholders,
            transport,
        }
    }

    #[must_use]
    pub fn unit(&self) -> &str {
        &self.unit
    }

    #[must_use]
    pub fn route_id(&self) -> &str {
        &self.route_id
    }

    /// Mode outbound calls of this route run under.
    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Calls the consumed operation declared under `consumes_id`.
    ///
    /// An undeclared id fails before anything is sent, so the completion is
    /// synchronous.
    pub async fn call(&self, consumes_id: &str, mut caller: RouteExchange) -> Completion {
        match self.producers.get(consumes_id) {
            Some(producer) => producer.process(caller, self.mode).await,
            None => {
                debug!(unit = %self.unit, consumes = consumes_id, "undeclared consumes id");
                caller.set_failure(Arc::new(BridgeError::Configuration(format!(
                    "unit {} declares no consumed operation {consumes_id}",
                    self.unit
                ))));
                Completion::Sync(caller)
            }
        }
    }

    /// Route property with placeholders expanded against the current snapshot.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<String> {
        let raw = self.properties.get(name)?;
        Some(self.placeholders.load().expand(raw))
    }

    /// Resolves the endpoint of a declared consumed operation on the bus.
    #[must_use]
    pub fn resolve_endpoint(&self, consumes_id: &str) -> Option<EndpointRef> {
        self.producers
            .get(consumes_id)?
            .endpoint()
            .resolve_endpoint(self.transport.as_ref())
    }
}

// ---------------------------------------------------------------------------
// Route
// ---------------------------------------------------------------------------

/// A compiled route. Immutable once built; shared by the registry and the
/// unit that owns it.
pub struct Route {
    id: String,
    key: OperationKey,
    mep: Mep,
    synchronous: bool,
    processor: Arc<dyn Processor>,
    ctx: RouteContext,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("mep", &self.mep)
            .field("synchronous", &self.synchronous)
            .field("unit", &self.ctx.unit())
            .finish_non_exhaustive()
    }
}

impl Route {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        key: OperationKey,
        mep: Mep,
        synchronous: bool,
        processor: Arc<dyn Processor>,
        ctx: RouteContext,
    ) -> Self {
        Self {
            id: id.into(),
            key,
            mep,
            synchronous,
            processor,
            ctx,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn key(&self) -> &OperationKey {
        &self.key
    }

    #[must_use]
    pub fn mep(&self) -> Mep {
        self.mep
    }

    #[must_use]
    pub fn is_synchronous(&self) -> bool {
        self.synchronous
    }

    /// Name of the deployment unit owning this route.
    #[must_use]
    pub fn unit(&self) -> &str {
        self.ctx.unit()
    }

    #[must_use]
    pub fn context(&self) -> &RouteContext {
        &self.ctx
    }

    /// Runs the pipeline for an inbound exchange and sends its answer.
    ///
    /// Returns `true` when the answer was sent before returning, `false` when
    /// it will be sent from a continuation task. A panicking processor still
    /// gets its exchange answered, with a `Route` failure.
    pub async fn process(&self, inbound: Exchange) -> bool {
        let exchange = route_exchange_from_inbound(&inbound);
        debug!(route = %self.id, exchange_id = exchange.id(), "route processing");

        let fallback = exchange.clone();
        let completion = match AssertUnwindSafe(self.processor.process(exchange, &self.ctx))
            .catch_unwind()
            .await
        {
            Ok(completion) => completion.catch_panic(fallback),
            Err(_) => {
                error!(route = %self.id, exchange_id = inbound.id(), "processor panicked");
                Completion::Sync(fallback.panicked())
            }
        };
        if self.synchronous && !completion.done_sync() {
            warn!(
                route = %self.id,
                exchange_id = inbound.id(),
                "synchronous route completed asynchronously; answering from continuation"
            );
        }

        let transport = Arc::clone(&self.ctx.transport);
        let route_id = self.id.clone();
        completion.on_complete(move |result, done_sync| {
            let mut inbound = inbound;
            populate_inbound_answer(&mut inbound, &result);
            let exchange_id = inbound.id().to_string();
            match transport.send_answer(inbound) {
                Ok(()) => debug!(route = %route_id, exchange_id = %exchange_id, done_sync, "answered"),
                Err(err) => error!(
                    route = %route_id,
                    exchange_id = %exchange_id,
                    error = %err,
                    "answer could not be sent"
                ),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Dispatch producer: sends a route exchange to a consumed operation,
//! blocking or not, and converts the answer back into the caller.
//!
//! Decision per call:
//! - **sync** when the consumes declaration or the pipeline asks for it:
//!   await `Transport::send_sync`, populate the caller, complete with
//!   `done_sync = true`;
//! - **async** otherwise: register a correlation entry, hand the exchange to
//!   `Transport::send_async`, and return a pending completion that populates
//!   the caller once the answer or the deadline arrives.
//!
//! Failures before anything is handed to the transport are always
//! synchronous completions, even on the async path.

use std::sync::Arc;
use std::time::Duration;

use switchyard_core::{AnswerHandler, BridgeError, Exchange, SendStatus, Transport};
use tracing::{debug, error};

use super::conversions::{populate_answer, populate_outbound};
use super::endpoint::{EndpointChannel, ServiceEndpointOperation};
use super::exchange::{Completion, RouteExchange};
use crate::config::ExecutionMode;
use crate::correlation::{CorrelationStore, Resolution};

/// Call-site settings from the consumes declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerSettings {
    /// Forces blocking sends regardless of the pipeline mode.
    pub synchronous: bool,
    pub timeout: Duration,
}

/// Sends route exchanges to one consumed operation.
pub struct DispatchProducer {
    endpoint: ServiceEndpointOperation,
    settings: ProducerSettings,
    transport: Arc<dyn Transport>,
    store: Arc<CorrelationStore>,
}

impl std::fmt::Debug for DispatchProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchProducer")
            .field("endpoint", &self.endpoint)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl DispatchProducer {
    #[must_use]
    pub fn new(
        endpoint: ServiceEndpointOperation,
        settings: ProducerSettings,
        transport: Arc<dyn Transport>,
        store: Arc<CorrelationStore>,
    ) -> Self {
        Self {
            endpoint,
            settings,
            transport,
            store,
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &ServiceEndpointOperation {
        &self.endpoint
    }

    #[must_use]
    pub fn settings(&self) -> ProducerSettings {
        self.settings
    }

    /// Mode actually used for a call made under `pipeline`.
    #[must_use]
    pub fn effective_mode(&self, pipeline: ExecutionMode) -> ExecutionMode {
        let call_site = if self.settings.synchronous {
            ExecutionMode::Synchronous
        } else {
            ExecutionMode::Asynchronous
        };
        call_site.combine(pipeline)
    }

    /// Sends `caller` to the consumed operation.
    ///
    /// The returned completion carries the caller populated with the answer,
    /// a fault, or an error (including the shared timeout error).
    pub async fn process(&self, mut caller: RouteExchange, pipeline: ExecutionMode) -> Completion {
        let mut outbound = match self.endpoint.new_exchange() {
            Ok(exchange) => exchange,
            Err(err) => {
                debug!(exchange_id = caller.id(), error = %err, "outbound exchange not created");
                caller.set_failure(Arc::new(err));
                return Completion::Sync(caller);
            }
        };
        populate_outbound(&mut outbound, &caller);

        match self.effective_mode(pipeline) {
            ExecutionMode::Synchronous => self.send_sync(caller, outbound).await,
            ExecutionMode::Asynchronous => self.send_async(caller, outbound),
        }
    }

    /// Callback form of [`Self::process`]: `done` is invoked exactly once with
    /// the populated caller and the returned `done_sync` flag.
    pub async fn process_with<F>(
        &self,
        caller: RouteExchange,
        pipeline: ExecutionMode,
        done: F,
    ) -> bool
    where
        F: FnOnce(RouteExchange, bool) + Send + 'static,
    {
        self.process(caller, pipeline).await.on_complete(done)
    }

    async fn send_sync(&self, mut caller: RouteExchange, mut outbound: Exchange) -> Completion {
        debug!(
            exchange_id = caller.id(),
            outbound_id = outbound.id(),
            target = %outbound.key(),
            "sending synchronously"
        );
        match self
            .transport
            .send_sync(&mut outbound, self.settings.timeout)
            .await
        {
            Ok(SendStatus::Answered) => handle_answer(&mut caller, Resolution::Answered(outbound)),
            Ok(SendStatus::TimedOut) => handle_answer(&mut caller, Resolution::TimedOut),
            Err(err) => caller.set_failure(Arc::new(err)),
        }
        Completion::Sync(caller)
    }

    fn send_async(&self, mut caller: RouteExchange, outbound: Exchange) -> Completion {
        let correlation_id = outbound.id().to_string();
        debug!(
            exchange_id = caller.id(),
            outbound_id = %correlation_id,
            target = %outbound.key(),
            "sending asynchronously"
        );

        // Registered before the hand-off so an immediate answer finds its entry.
        let pending = match self
            .store
            .begin_async(correlation_id.clone(), self.settings.timeout)
        {
            Ok(pending) => pending,
            Err(err) => {
                error!(error = %err, "cannot track outbound exchange");
                caller.set_failure(Arc::new(BridgeError::Internal(err.to_string())));
                return Completion::Sync(caller);
            }
        };

        let handler: Arc<dyn AnswerHandler> = self.store.clone();
        if let Err(err) = self
            .transport
            .send_async(outbound, self.settings.timeout, handler)
        {
            self.store.discard(&correlation_id);
            caller.set_failure(Arc::new(err));
            return Completion::Sync(caller);
        }

        Completion::pending(async move {
            let resolution = pending.await;
            handle_answer(&mut caller, resolution);
            caller
        })
    }
}

fn handle_answer(caller: &mut RouteExchange, resolution: Resolution) {
    match resolution {
        Resolution::TimedOut => caller.set_failure(BridgeError::timeout()),
        Resolution::Answered(answer) => populate_answer(caller, &answer),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

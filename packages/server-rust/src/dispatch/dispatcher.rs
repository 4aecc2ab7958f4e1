//! Inbound dispatcher: entry point for exchanges the bus delivers to us.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use switchyard_core::{BridgeError, Exchange, ExchangeStatus, Role};
use tower::Service;
use tracing::{debug, warn};

use crate::routing::RouteRegistry;

/// What happened to an inbound exchange.
#[derive(Debug)]
pub enum Dispatch {
    /// A route owns the exchange and answers it, before returning when
    /// `done_sync` is set, later otherwise.
    Routed { done_sync: bool },
    /// No route took the exchange. It carries an error and the caller must
    /// send it back.
    AnswerBack(Exchange),
    /// A done or error exchange arrived where only fresh ones belong; it was
    /// dropped.
    Skipped,
}

impl Dispatch {
    /// `false` only when the caller must answer the exchange itself.
    #[must_use]
    pub fn handled_here(&self) -> bool {
        !matches!(self, Self::AnswerBack(_))
    }

    /// The exchange to answer, if the caller must.
    #[must_use]
    pub fn auto_answer(self) -> Option<Exchange> {
        match self {
            Self::AnswerBack(exchange) => Some(exchange),
            Self::Routed { .. } | Self::Skipped => None,
        }
    }

    /// Label used for logs and metrics.
    #[must_use]
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Routed { done_sync: true } => "routed_sync",
            Self::Routed { done_sync: false } => "routed_async",
            Self::AnswerBack(_) => "answer_back",
            Self::Skipped => "skipped",
        }
    }
}

/// Checks inbound exchanges and hands them to the route registered for
/// their operation.
#[derive(Debug, Clone)]
pub struct InboundDispatcher {
    registry: Arc<RouteRegistry>,
}

impl InboundDispatcher {
    #[must_use]
    pub fn new(registry: Arc<RouteRegistry>) -> Self {
        Self { registry }
    }

    /// Dispatches one inbound exchange. Never fails: every problem ends up
    /// on the exchange or in the log.
    pub async fn dispatch(&self, mut exchange: Exchange) -> Dispatch {
        match exchange.status() {
            ExchangeStatus::Active => {}
            status @ (ExchangeStatus::Done | ExchangeStatus::Error) => {
                warn!(
                    exchange_id = exchange.id(),
                    ?status,
                    "inbound exchange is not active; discarded"
                );
                return Dispatch::Skipped;
            }
        }

        if exchange.role() != Role::Provider {
            let error = BridgeError::RoleMismatch {
                exchange_id: exchange.id().to_string(),
                role: exchange.role(),
            };
            warn!(error = %error, "inbound exchange rejected");
            exchange.set_error(Arc::new(error));
            return Dispatch::AnswerBack(exchange);
        }

        match self.registry.lookup(exchange.key()) {
            Ok(route) => {
                debug!(exchange_id = exchange.id(), route = route.id(), "dispatching");
                let done_sync = route.process(exchange).await;
                Dispatch::Routed { done_sync }
            }
            Err(error) => {
                debug!(exchange_id = exchange.id(), error = %error, "no route");
                exchange.set_error(Arc::new(error));
                Dispatch::AnswerBack(exchange)
            }
        }
    }
}

impl Service<Exchange> for InboundDispatcher {
    type Response = Dispatch;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Dispatch, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, exchange: Exchange) -> Self::Future {
        let dispatcher = self.clone();
        Box::pin(async move { Ok(dispatcher.dispatch(exchange).await) })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

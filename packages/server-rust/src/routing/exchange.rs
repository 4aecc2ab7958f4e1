//! Route-side exchange model and completion signalling.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::{BoxFuture, FutureExt};
use switchyard_core::{BridgeError, Mep, Message};
use tracing::error;

// ---------------------------------------------------------------------------
// RouteExchange
// ---------------------------------------------------------------------------

/// The unit of work a route pipeline operates on.
///
/// Distinct from the bus `Exchange`: a pipeline sees a body, headers and
/// properties, and records its result as an out message, a fault, or a failure.
#[derive(Debug, Clone)]
pub struct RouteExchange {
    id: String,
    pattern: Mep,
    pub body: Bytes,
    pub headers: BTreeMap<String, String>,
    pub properties: HashMap<String, serde_json::Value>,
    out: Option<Message>,
    fault: Option<Message>,
    failure: Option<Arc<BridgeError>>,
}

impl RouteExchange {
    #[must_use]
    pub fn new(pattern: Mep, body: impl Into<Bytes>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), pattern, body)
    }

    #[must_use]
    pub fn with_id(id: impl Into<String>, pattern: Mep, body: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            pattern,
            body: body.into(),
            headers: BTreeMap::new(),
            properties: HashMap::new(),
            out: None,
            fault: None,
            failure: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn pattern(&self) -> Mep {
        self.pattern
    }

    #[must_use]
    pub fn out(&self) -> Option<&Message> {
        self.out.as_ref()
    }

    pub fn set_out(&mut self, message: Message) {
        self.out = Some(message);
    }

    #[must_use]
    pub fn fault(&self) -> Option<&Message> {
        self.fault.as_ref()
    }

    pub fn set_fault(&mut self, message: Message) {
        self.fault = Some(message);
    }

    #[must_use]
    pub fn failure(&self) -> Option<&Arc<BridgeError>> {
        self.failure.as_ref()
    }

    pub fn set_failure(&mut self, failure: Arc<BridgeError>) {
        self.failure = Some(failure);
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Marks the exchange as failed by a panicking processor.
    #[must_use]
    pub fn panicked(mut self) -> Self {
        self.set_failure(Arc::new(BridgeError::Route("processor panicked".to_string())));
        self
    }
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// Outcome of handing a route exchange to a producer or processor.
///
/// `Sync` means the result is already populated. `Async` resolves to the
/// populated exchange later, on whichever task drives it.
pub enum Completion {
    Sync(RouteExchange),
    Async(BoxFuture<'static, RouteExchange>),
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(exchange) => f.debug_tuple("Sync").field(exchange).finish(),
            Self::Async(_) => f.write_str("Async(..)"),
        }
    }
}

impl Completion {
    /// Wraps a future that yields the populated exchange.
    pub fn pending<F>(future: F) -> Self
    where
        F: std::future::Future<Output = RouteExchange> + Send + 'static,
    {
        Self::Async(future.boxed())
    }

    #[must_use]
    pub fn done_sync(&self) -> bool {
        matches!(self, Self::Sync(_))
    }

    /// Waits for the populated exchange.
    pub async fn wait(self) -> RouteExchange {
        match self {
            Self::Sync(exchange) => exchange,
            Self::Async(future) => future.await,
        }
    }

    /// Applies `f` to the result, immediately for `Sync`, on resolution for `Async`.
    #[must_use]
    pub fn map<F>(self, f: F) -> Self
    where
        F: FnOnce(RouteExchange) -> RouteExchange + Send + 'static,
    {
        match self {
            Self::Sync(exchange) => Self::Sync(f(exchange)),
            Self::Async(future) => Self::Async(future.map(f).boxed()),
        }
    }

    /// Resolves to `fallback` marked as panicked if producing the result
    /// panics, instead of never resolving.
    #[must_use]
    pub fn catch_panic(self, fallback: RouteExchange) -> Self {
        match self {
            Self::Sync(exchange) => Self::Sync(exchange),
            Self::Async(future) => Self::Async(
                AssertUnwindSafe(future)
                    .catch_unwind()
                    .map(move |outcome| {
                        outcome.unwrap_or_else(|_| {
                            error!(exchange_id = fallback.id(), "processor panicked in continuation");
                            fallback.panicked()
                        })
                    })
                    .boxed(),
            ),
        }
    }

    /// Invokes `done` exactly once with the result and whether it completed
    /// synchronously, and returns that same flag.
    ///
    /// For `Async`, `done` runs on a spawned tokio task.
    pub fn on_complete<F>(self, done: F) -> bool
    where
        F: FnOnce(RouteExchange, bool) + Send + 'static,
    {
        match self {
            Self::Sync(exchange) => {
                done(exchange, true);
                true
            }
            Self::Async(future) => {
                tokio::spawn(async move {
                    let exchange = future.await;
                    done(exchange, false);
                });
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::oneshot;

    use super::*;

    #[tokio::test]
    async fn sync_completion_calls_back_inline() {
        let exchange = RouteExchange::new(Mep::InOut, "hello");
        let (tx, rx) = oneshot::channel();
        let done_sync = Completion::Sync(exchange).on_complete(move |ex, sync| {
            let _ = tx.send((ex.body.clone(), sync));
        });
        assert!(done_sync);
        let (body, sync) = rx.await.unwrap();
        assert_eq!(body, Bytes::from_static(b"hello"));
        assert!(sync);
    }

    #[tokio::test]
    async fn async_completion_calls_back_later() {
        let exchange = RouteExchange::new(Mep::InOut, "hello");
        let completion = Completion::pending(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            exchange
        });
        let (tx, rx) = oneshot::channel();
        let done_sync = completion.on_complete(move |_, sync| {
            let _ = tx.send(sync);
        });
        assert!(!done_sync);
        assert!(!rx.await.unwrap());
    }

    #[tokio::test]
    async fn map_applies_after_resolution() {
        let exchange = RouteExchange::new(Mep::InOut, "a");
        let completion = Completion::pending(async move { exchange }).map(|mut ex| {
            ex.set_out(Message::new("b"));
            ex
        });
        assert!(!completion.done_sync());
        let result = completion.wait().await;
        assert_eq!(result.out().unwrap().content, Bytes::from_static(b"b"));
    }

    #[tokio::test]
    async fn panic_in_continuation_resolves_to_failed_fallback() {
        async fn explode() -> RouteExchange {
            tokio::time::sleep(Duration::from_millis(5)).await;
            panic!("boom")
        }

        let exchange = RouteExchange::with_id("r-2", Mep::InOut, "hello");
        let completion = Completion::pending(explode()).catch_panic(exchange);

        let (tx, rx) = oneshot::channel();
        assert!(!completion.on_complete(move |ex, sync| {
            let _ = tx.send((ex, sync));
        }));
        let (result, sync) = rx.await.unwrap();
        assert!(!sync);
        assert_eq!(result.id(), "r-2");
        assert_eq!(
            result.failure().map(|e| &**e),
            Some(&BridgeError::Route("processor panicked".to_string()))
        );
    }

    #[test]
    fn failure_marks_exchange_failed() {
        let mut exchange = RouteExchange::with_id("r-1", Mep::InOnly, Bytes::new());
        assert!(!exchange.is_failed());
        exchange.set_failure(BridgeError::timeout());
        assert!(exchange.failure().unwrap().is_timeout());
        assert_eq!(exchange.id(), "r-1");
    }
}

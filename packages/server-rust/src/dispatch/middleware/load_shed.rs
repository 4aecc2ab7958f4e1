//! Load-shedding middleware for inbound dispatch.
//!
//! Answers inbound exchanges with `BridgeError::Overloaded` when the number
//! of concurrent dispatches exceeds `max_concurrent_exchanges`.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use switchyard_core::{BridgeError, Exchange};
use tokio::sync::Semaphore;
use tower::{Layer, Service};
use tracing::warn;

use crate::dispatch::dispatcher::Dispatch;

// ---------------------------------------------------------------------------
// LoadShedLayer
// ---------------------------------------------------------------------------

/// Tower layer that limits concurrent dispatches via a semaphore.
///
/// When all permits are taken, incoming exchanges are answered immediately
/// rather than queued.
#[derive(Debug, Clone)]
pub struct LoadShedLayer {
    semaphore: Arc<Semaphore>,
}

impl LoadShedLayer {
    #[must_use]
    pub fn new(max_concurrent: u32) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent as usize)),
        }
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            semaphore: self.semaphore.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// LoadShedService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadShedService<S> {
    inner: S,
    semaphore: Arc<Semaphore>,
}

impl<S> Service<Exchange> for LoadShedService<S>
where
    S: Service<Exchange, Response = Dispatch, Error = Infallible> + Send,
    S::Future: Send + 'static,
{
    type Response = Dispatch;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Dispatch, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut exchange: Exchange) -> Self::Future {
        let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
            warn!(exchange_id = exchange.id(), "overloaded; answering without dispatch");
            metrics::counter!("switchyard_inbound_total", "outcome" => "overloaded").increment(1);
            exchange.set_error(Arc::new(BridgeError::Overloaded));
            return Box::pin(async move { Ok(Dispatch::AnswerBack(exchange)) });
        };

        let fut = self.inner.call(exchange);
        Box::pin(async move {
            // Held until the route returns, not until an async answer arrives.
            let result = fut.await;
            drop(permit);
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use switchyard_core::{Mep, OperationKey, Role};
    use tower::ServiceExt;

    use super::*;

    /// Dispatch stand-in that holds for a configurable duration.
    struct SlowService {
        delay_ms: u64,
    }

    impl Service<Exchange> for SlowService {
        type Response = Dispatch;
        type Error = Infallible;
        type Future = Pin<Box<dyn Future<Output = Result<Dispatch, Infallible>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _exchange: Exchange) -> Self::Future {
            let delay = self.delay_ms;
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(Dispatch::Routed { done_sync: true })
            })
        }
    }

    fn inbound() -> Exchange {
        Exchange::new(OperationKey::new("svc", "ep", "op"), Mep::InOut, Role::Provider)
    }

    #[tokio::test]
    async fn allows_exchanges_under_limit() {
        let svc = LoadShedLayer::new(10).layer(SlowService { delay_ms: 1 });
        let dispatch = svc.oneshot(inbound()).await.unwrap();
        assert!(matches!(dispatch, Dispatch::Routed { .. }));
    }

    #[tokio::test]
    async fn answers_overloaded_when_saturated() {
        let mut svc = LoadShedLayer::new(1).layer(SlowService { delay_ms: 500 });

        // First exchange takes the single permit.
        let _ = ServiceExt::ready(&mut svc).await.unwrap();
        let _in_flight = tokio::spawn({
            let fut = svc.call(inbound());
            async move { fut.await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let dispatch = svc.call(inbound()).await.unwrap();
        assert!(!dispatch.handled_here());
        let answer = dispatch.auto_answer().unwrap();
        assert_eq!(answer.error().map(|e| &**e), Some(&BridgeError::Overloaded));
    }
}

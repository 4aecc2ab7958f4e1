//! Metrics middleware for inbound dispatch.
//!
//! Wraps each dispatch in a `tracing` span recording duration and outcome,
//! and counts outcomes with the `metrics` crate.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use switchyard_core::Exchange;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::dispatch::dispatcher::Dispatch;

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments inbound dispatch.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<Exchange> for MetricsService<S>
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

    fn call(&mut self, exchange: Exchange) -> Self::Future {
        let span = info_span!(
            "inbound",
            exchange_id = exchange.id(),
            service = %exchange.key().service,
            operation = %exchange.key().operation,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(exchange);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

                let outcome = match &result {
                    Ok(dispatch) => dispatch.outcome(),
                    Err(never) => match *never {},
                };
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);
                metrics::counter!("switchyard_inbound_total", "outcome" => outcome).increment(1);

                tracing::debug!(duration_ms, outcome, "inbound exchange dispatched");
                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use switchyard_core::{Mep, OperationKey, Role};
    use tower::ServiceExt;

    use super::*;

    /// Immediately-completing dispatch stand-in.
    struct ImmediateService;

    impl Service<Exchange> for ImmediateService {
        type Response = Dispatch;
        type Error = Infallible;
        type Future = Pin<Box<dyn Future<Output = Result<Dispatch, Infallible>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _exchange: Exchange) -> Self::Future {
            Box::pin(async { Ok(Dispatch::Skipped) })
        }
    }

    #[tokio::test]
    async fn metrics_layer_passes_dispatch_through() {
        let svc = MetricsLayer.layer(ImmediateService);
        let exchange =
            Exchange::new(OperationKey::new("svc", "ep", "op"), Mep::InOnly, Role::Provider);

        let dispatch = svc.oneshot(exchange).await.unwrap();
        assert!(matches!(dispatch, Dispatch::Skipped));
    }
}

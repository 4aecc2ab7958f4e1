//! Pipeline composition: combines the middleware layers around the dispatcher.

use std::convert::Infallible;

use switchyard_core::Exchange;
use tower::util::BoxCloneSyncService;
use tower::ServiceBuilder;

use super::load_shed::LoadShedLayer;
use super::metrics::MetricsLayer;
use crate::config::BridgeConfig;
use crate::dispatch::dispatcher::{Dispatch, InboundDispatcher};

/// Type-erased inbound pipeline.
pub type InboundService = BoxCloneSyncService<Exchange, Dispatch, Infallible>;

/// Wraps the `InboundDispatcher` with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer` -- answer `Overloaded` when saturated, before any work
/// 2. `MetricsLayer` -- record timing and outcome of the actual dispatch
#[must_use]
pub fn build_inbound_pipeline(dispatcher: InboundDispatcher, config: &BridgeConfig) -> InboundService {
    let service = ServiceBuilder::new()
        .layer(LoadShedLayer::new(config.max_concurrent_exchanges))
        .layer(MetricsLayer)
        .service(dispatcher);
    BoxCloneSyncService::new(service)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use switchyard_core::{Mep, OperationKey, Role};
    use tower::ServiceExt;

    use super::*;
    use crate::routing::RouteRegistry;
    use crate::test_support::echo_route;

    #[tokio::test]
    async fn pipeline_routes_through_all_layers() {
        let registry = Arc::new(RouteRegistry::new());
        let key = OperationKey::new("svc", "ep", "op");
        registry.register(echo_route("r1", key.clone())).unwrap();

        let config = BridgeConfig {
            max_concurrent_exchanges: 100,
            ..BridgeConfig::default()
        };
        let svc = build_inbound_pipeline(InboundDispatcher::new(registry), &config);

        let routed = svc
            .clone()
            .oneshot(Exchange::new(key, Mep::InOut, Role::Provider))
            .await
            .unwrap();
        assert!(matches!(routed, Dispatch::Routed { done_sync: true }));

        let missing = svc
            .oneshot(Exchange::new(
                OperationKey::new("svc", "ep", "other"),
                Mep::InOut,
                Role::Provider,
            ))
            .await
            .unwrap();
        assert!(!missing.handled_here());
    }
}

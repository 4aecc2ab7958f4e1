//! Builders shared by unit tests.

use std::collections::HashMap;
use std::sync::Arc;

use switchyard_core::{Mep, Message, OperationKey};

use crate::config::ExecutionMode;
use crate::routing::{FnProcessor, Route, RouteContext, RouteExchange};
use crate::transport::MemoryTransport;

/// An in-out route that answers with its request body.
pub(crate) fn echo_route(id: impl Into<String>, key: OperationKey) -> Arc<Route> {
    let id = id.into();
    let ctx = RouteContext::new(
        "test-unit",
        id.as_str(),
        ExecutionMode::Asynchronous,
        Arc::new(HashMap::new()),
        HashMap::new(),
        Arc::default(),
        Arc::new(MemoryTransport::new()),
    );
    let processor = FnProcessor::new(|ex: &mut RouteExchange, _: &RouteContext| {
        let body = ex.body.clone();
        ex.set_out(Message::new(body));
    });
    Arc::new(Route::new(id, key, Mep::InOut, false, Arc::new(processor), ctx))
}

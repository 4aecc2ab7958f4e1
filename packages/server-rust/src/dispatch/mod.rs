//! Inbound dispatch: the dispatcher and the middleware stack around it.

pub mod dispatcher;
pub mod middleware;

pub use dispatcher::{Dispatch, InboundDispatcher};
pub use middleware::{build_inbound_pipeline, InboundService};

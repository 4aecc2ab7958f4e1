//! Routing: routes and their registry, route-side exchanges, and the
//! producer routes use to call other operations.

pub mod conversions;
pub mod endpoint;
pub mod exchange;
pub mod producer;
pub mod registry;
pub mod route;

pub use endpoint::{EndpointChannel, OperationRecord, ServiceEndpointOperation};
pub use exchange::{Completion, RouteExchange};
pub use producer::{DispatchProducer, ProducerSettings};
pub use registry::{RegistryError, RouteRegistry};
pub use route::{FnProcessor, ForwardProcessor, Processor, Route, RouteContext};

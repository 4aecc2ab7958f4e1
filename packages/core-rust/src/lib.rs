//! Switchyard Core: operation keys, bus exchanges, bridge errors, and transport contracts.

pub mod error;
pub mod exchange;
pub mod key;
pub mod traits;

pub use error::BridgeError;
pub use exchange::{Exchange, ExchangeStatus, Mep, Message, Role};
pub use key::OperationKey;
pub use traits::{AnswerHandler, EndpointRef, SendStatus, Transport};

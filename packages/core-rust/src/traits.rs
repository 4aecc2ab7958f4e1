use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::BridgeError;
use crate::exchange::Exchange;

/// Result of a blocking send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// The provider answered; the exchange now carries the answer.
    Answered,
    /// The deadline passed before any answer arrived.
    TimedOut,
}

/// An endpoint known to the bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointRef {
    pub service: String,
    pub endpoint: String,
}

/// Receives answers to exchanges that were sent with `Transport::send_async`.
///
/// The answer exchange keeps the id of the exchange that was sent, which is
/// how the handler correlates it. Handlers must tolerate answers for ids they
/// no longer track.
pub trait AnswerHandler: Send + Sync {
    /// Returns `false` when nobody was waiting for this answer any more.
    fn on_answer(&self, answer: Exchange) -> bool;
}

/// The service bus transport. The core builds `Exchange` values and hands
/// them over; it never constructs raw transport messages.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends the exchange and waits for its answer, up to `timeout`.
    /// On `Answered` the answer has been written into `exchange`.
    async fn send_sync(
        &self,
        exchange: &mut Exchange,
        timeout: Duration,
    ) -> Result<SendStatus, BridgeError>;

    /// Hands the exchange off and returns immediately. The answer, if any,
    /// is later delivered to `handler` from whichever thread the transport uses.
    fn send_async(
        &self,
        exchange: Exchange,
        timeout: Duration,
        handler: Arc<dyn AnswerHandler>,
    ) -> Result<(), BridgeError>;

    /// Sends the answer (out, fault, error or done) of a provider-role exchange
    /// back to its consumer.
    fn send_answer(&self, exchange: Exchange) -> Result<(), BridgeError>;

    /// Looks up an endpoint activated on the bus.
    fn resolve_endpoint(&self, service: &str, endpoint: &str) -> Option<EndpointRef>;
}

//! In-process bus transport.
//!
//! Providers are registered per `(service, endpoint)` with a scripted
//! behavior. Answers to inbound exchanges are recorded so tests and embedding
//! code can observe what the bridge sent back.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use switchyard_core::{
    AnswerHandler, BridgeError, EndpointRef, Exchange, Message, SendStatus, Transport,
};
use tokio::sync::Notify;
use tracing::debug;

/// Builds the out message of a replying provider from the request message.
pub type Responder = Arc<dyn Fn(&Message) -> Message + Send + Sync>;

/// How a registered provider answers the exchanges sent to it.
#[derive(Clone)]
pub enum ProviderBehavior {
    Reply { delay: Duration, respond: Responder },
    Fault { delay: Duration, fault: Message },
    Fail { delay: Duration, error: BridgeError },
    Done { delay: Duration },
    /// Never answers.
    Silent,
}

impl fmt::Debug for ProviderBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reply { delay, .. } => f.debug_struct("Reply").field("delay", delay).finish(),
            Self::Fault { delay, .. } => f.debug_struct("Fault").field("delay", delay).finish(),
            Self::Fail { delay, error } => f
                .debug_struct("Fail")
                .field("delay", delay)
                .field("error", error)
                .finish(),
            Self::Done { delay } => f.debug_struct("Done").field("delay", delay).finish(),
            Self::Silent => f.write_str("Silent"),
        }
    }
}

impl ProviderBehavior {
    pub fn reply_after<F>(delay: Duration, respond: F) -> Self
    where
        F: Fn(&Message) -> Message + Send + Sync + 'static,
    {
        Self::Reply {
            delay,
            respond: Arc::new(respond),
        }
    }

    /// Replies with the request content unchanged.
    #[must_use]
    pub fn echo() -> Self {
        Self::reply_after(Duration::ZERO, Message::clone)
    }

    /// Produces the answer to `exchange`, or `None` for a silent provider.
    async fn answer(&self, mut exchange: Exchange) -> Option<Exchange> {
        let delay = match self {
            Self::Reply { delay, .. }
            | Self::Fault { delay, .. }
            | Self::Fail { delay, .. }
            | Self::Done { delay } => *delay,
            Self::Silent => return None,
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match self {
            Self::Reply { respond, .. } => {
                let input = exchange.input().cloned().unwrap_or_default();
                exchange.set_output(respond(&input));
            }
            Self::Fault { fault, .. } => exchange.set_fault(fault.clone()),
            Self::Fail { error, .. } => exchange.set_error(Arc::new(error.clone())),
            Self::Done { .. } => exchange.set_done(),
            Self::Silent => return None,
        }
        Some(exchange)
    }
}

/// Bus transport that keeps every endpoint inside the current process.
#[derive(Default)]
pub struct MemoryTransport {
    providers: DashMap<EndpointRef, ProviderBehavior>,
    answers: Mutex<Vec<Exchange>>,
    answered: Notify,
    sent: AtomicUsize,
    late_answers: Arc<AtomicUsize>,
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("providers", &self.providers.len())
            .field("answers", &self.answers.lock().len())
            .field("sent", &self.sent_count())
            .finish()
    }
}

impl MemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Activates an endpoint; replaces any behavior already registered for it.
    pub fn register_provider(
        &self,
        service: impl Into<String>,
        endpoint: impl Into<String>,
        behavior: ProviderBehavior,
    ) {
        let endpoint = EndpointRef {
            service: service.into(),
            endpoint: endpoint.into(),
        };
        self.providers.insert(endpoint, behavior);
    }

    pub fn unregister_provider(&self, service: &str, endpoint: &str) -> bool {
        self.providers
            .remove(&EndpointRef {
                service: service.to_string(),
                endpoint: endpoint.to_string(),
            })
            .is_some()
    }

    /// Number of outbound exchanges handed to a provider.
    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::Relaxed)
    }

    /// Number of provider answers that arrived after nobody was waiting.
    #[must_use]
    pub fn late_answers(&self) -> usize {
        self.late_answers.load(Ordering::Relaxed)
    }

    /// Answers sent back for inbound exchanges, in arrival order.
    #[must_use]
    pub fn answers(&self) -> Vec<Exchange> {
        self.answers.lock().clone()
    }

    /// Waits until at least `count` answers were sent back, then returns them all.
    pub async fn wait_for_answers(&self, count: usize) -> Vec<Exchange> {
        loop {
            // Registered before the check so a concurrent answer is not missed.
            let notified = self.answered.notified();
            {
                let answers = self.answers.lock();
                if answers.len() >= count {
                    return answers.clone();
                }
            }
            notified.await;
        }
    }

    fn provider_for(&self, exchange: &Exchange) -> Result<ProviderBehavior, BridgeError> {
        let key = exchange.key();
        let endpoint = EndpointRef {
            service: key.service.clone(),
            endpoint: key.endpoint.clone(),
        };
        let behavior = if key.endpoint.is_empty() {
            // No endpoint named: any endpoint of the service will do.
            self.providers
                .iter()
                .find(|entry| entry.key().service == key.service)
                .map(|entry| entry.value().clone())
        } else {
            self.providers.get(&endpoint).map(|entry| entry.value().clone())
        };
        behavior.ok_or_else(|| {
            BridgeError::Transport(format!(
                "no endpoint {} of service {} is active",
                key.endpoint, key.service
            ))
        })
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_sync(
        &self,
        exchange: &mut Exchange,
        timeout: Duration,
    ) -> Result<SendStatus, BridgeError> {
        let behavior = self.provider_for(exchange)?;
        self.sent.fetch_add(1, Ordering::Relaxed);

        let request = exchange.clone();
        let answer = async move {
            match behavior.answer(request).await {
                Some(answer) => answer,
                None => std::future::pending().await,
            }
        };
        match tokio::time::timeout(timeout, answer).await {
            Ok(answer) => {
                *exchange = answer;
                Ok(SendStatus::Answered)
            }
            Err(_) => Ok(SendStatus::TimedOut),
        }
    }

    fn send_async(
        &self,
        exchange: Exchange,
        _timeout: Duration,
        handler: Arc<dyn AnswerHandler>,
    ) -> Result<(), BridgeError> {
        let behavior = self.provider_for(&exchange)?;
        self.sent.fetch_add(1, Ordering::Relaxed);

        let late_answers = Arc::clone(&self.late_answers);
        tokio::spawn(async move {
            let Some(answer) = behavior.answer(exchange).await else {
                return;
            };
            let id = answer.id().to_string();
            if !handler.on_answer(answer) {
                debug!(exchange_id = %id, "answer arrived after the sender stopped waiting");
                late_answers.fetch_add(1, Ordering::Relaxed);
            }
        });
        Ok(())
    }

    fn send_answer(&self, exchange: Exchange) -> Result<(), BridgeError> {
        debug!(
            exchange_id = exchange.id(),
            status = ?exchange.status(),
            "answer sent back"
        );
        self.answers.lock().push(exchange);
        self.answered.notify_waiters();
        Ok(())
    }

    fn resolve_endpoint(&self, service: &str, endpoint: &str) -> Option<EndpointRef> {
        let endpoint = EndpointRef {
            service: service.to_string(),
            endpoint: endpoint.to_string(),
        };
        self.providers
            .contains_key(&endpoint)
            .then_some(endpoint)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

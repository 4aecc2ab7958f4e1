//! Async correlation: tracks in-flight asynchronous sends until they are
//! answered or their deadline elapses.
//!
//! Each entry owns a one-shot channel. Resolution claims the entry with an
//! atomic remove from the map, so whichever of {answer, deadline} removes it
//! first is the only one that reaches the channel. The loser finds nothing and
//! is a silent no-op.

pub mod sweeper;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use switchyard_core::{AnswerHandler, Exchange};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

pub use sweeper::{CorrelationSweeper, SweepTask};

// ---------------------------------------------------------------------------
// Resolution / errors
// ---------------------------------------------------------------------------

/// How an in-flight asynchronous send ended.
#[derive(Debug)]
pub enum Resolution {
    /// The answer exchange, as delivered by the transport.
    Answered(Exchange),
    /// The deadline elapsed first.
    TimedOut,
}

impl Resolution {
    #[must_use]
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

/// Programming errors raised by the store.
#[derive(Debug, thiserror::Error)]
pub enum CorrelationError {
    #[error("correlation id {0} already has an in-flight entry")]
    Duplicate(String),
}

// ---------------------------------------------------------------------------
// PendingAnswer
// ---------------------------------------------------------------------------

/// Receiving half of an in-flight entry. Resolves exactly once.
#[derive(Debug)]
pub struct PendingAnswer {
    correlation_id: String,
    rx: oneshot::Receiver<Resolution>,
}

impl PendingAnswer {
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

impl Future for PendingAnswer {
    type Output = Resolution;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let polled = Pin::new(&mut self.rx).poll(cx);
        let id = &self.correlation_id;
        polled.map(|outcome| {
            outcome.unwrap_or_else(|_| {
                // The store went away with the entry still in it.
                warn!(
                    correlation_id = %id,
                    "correlation entry dropped unresolved, treating as timeout"
                );
                Resolution::TimedOut
            })
        })
    }
}

// ---------------------------------------------------------------------------
// CorrelationStore
// ---------------------------------------------------------------------------

struct PendingEntry {
    tx: oneshot::Sender<Resolution>,
    deadline: Instant,
    timer: Option<AbortHandle>,
}

/// Concurrent store of in-flight asynchronous sends.
///
/// Entries are removed as soon as they resolve; the sweeper only catches
/// entries whose deadline timer never ran.
#[derive(Default)]
pub struct CorrelationStore {
    entries: DashMap<String, PendingEntry>,
}

impl std::fmt::Debug for CorrelationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationStore")
            .field("in_flight", &self.entries.len())
            .finish()
    }
}

impl CorrelationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an in-flight send and arms its deadline timer.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `CorrelationError::Duplicate` if `correlation_id` is already in flight.
    pub fn begin_async(
        self: &Arc<Self>,
        correlation_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<PendingAnswer, CorrelationError> {
        let correlation_id = correlation_id.into();
        match self.entries.entry(correlation_id.clone()) {
            Entry::Occupied(_) => {
                error!(correlation_id = %correlation_id, "duplicate correlation id");
                Err(CorrelationError::Duplicate(correlation_id))
            }
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                // The timer blocks on this shard until the insert lands, so it
                // always finds the entry it was armed for.
                let timer = arm_deadline(Arc::downgrade(self), correlation_id.clone(), timeout);
                slot.insert(PendingEntry {
                    tx,
                    deadline: Instant::now() + timeout,
                    timer: Some(timer),
                });
                debug!(
                    correlation_id = %correlation_id,
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "async send registered"
                );
                Ok(PendingAnswer { correlation_id, rx })
            }
        }
    }

    /// Resolves an entry. Returns `true` if this call claimed it.
    ///
    /// A `false` return means the entry was already resolved (or never
    /// existed); the resolution is dropped silently.
    pub fn resolve(&self, correlation_id: &str, resolution: Resolution) -> bool {
        let Some((_, entry)) = self.entries.remove(correlation_id) else {
            debug!(
                correlation_id,
                timed_out = resolution.is_timed_out(),
                "late resolution dropped"
            );
            return false;
        };

        if !resolution.is_timed_out() {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
        }
        // The receiver may be gone if the caller stopped waiting.
        let _ = entry.tx.send(resolution);
        true
    }

    /// Removes an entry without resolving it, e.g. when the send itself failed.
    pub fn discard(&self, correlation_id: &str) -> bool {
        match self.entries.remove(correlation_id) {
            Some((_, entry)) => {
                if let Some(timer) = entry.timer {
                    timer.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Times out every entry whose deadline passed more than `grace` ago.
    /// Returns how many entries this sweep resolved.
    pub fn sweep_expired(&self, grace: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.deadline + grace <= now)
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .iter()
            .filter(|id| self.resolve(id, Resolution::TimedOut))
            .count()
    }

    #[must_use]
    pub fn contains(&self, correlation_id: &str) -> bool {
        self.entries.contains_key(correlation_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl AnswerHandler for CorrelationStore {
    fn on_answer(&self, answer: Exchange) -> bool {
        let id = answer.id().to_string();
        self.resolve(&id, Resolution::Answered(answer))
    }
}

fn arm_deadline(
    store: Weak<CorrelationStore>,
    correlation_id: String,
    timeout: Duration,
) -> AbortHandle {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        if let Some(store) = store.upgrade() {
            if store.resolve(&correlation_id, Resolution::TimedOut) {
                debug!(correlation_id = %correlation_id, "async send timed out");
            }
        }
    })
    .abort_handle()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use switchyard_core::{Mep, OperationKey, Role};

    use super::*;

    fn answer(id: &str) -> Exchange {
        Exchange::with_id(id, OperationKey::new("svc", "ep", "op"), Mep::InOut, Role::Consumer)
    }

    #[tokio::test(start_paused = true)]
    async fn answer_before_deadline_wins() {
        let store = Arc::new(CorrelationStore::new());
        let pending = store.begin_async("c-1", Duration::from_millis(100)).unwrap();
        assert!(store.contains("c-1"));

        assert!(store.resolve("c-1", Resolution::Answered(answer("c-1"))));
        assert!(store.is_empty());

        match pending.await {
            Resolution::Answered(ex) => assert_eq!(ex.id(), "c-1"),
            Resolution::TimedOut => panic!("expected answer"),
        }

        // The deadline passing later must not resolve anything again.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!store.resolve("c-1", Resolution::TimedOut));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_resolves_with_timeout() {
        let store = Arc::new(CorrelationStore::new());
        let started = Instant::now();
        let pending = store.begin_async("c-2", Duration::from_millis(100)).unwrap();

        let resolution = pending.await;
        assert!(resolution.is_timed_out());
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn late_answer_is_dropped_silently() {
        let store = Arc::new(CorrelationStore::new());
        let pending = store.begin_async("c-3", Duration::from_millis(100)).unwrap();
        assert!(pending.await.is_timed_out());

        store.on_answer(answer("c-3"));
        assert!(!store.resolve("c-3", Resolution::Answered(answer("c-3"))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn duplicate_correlation_id_is_rejected() {
        let store = Arc::new(CorrelationStore::new());
        let _pending = store.begin_async("c-4", Duration::from_secs(10)).unwrap();
        let err = store.begin_async("c-4", Duration::from_secs(10)).unwrap_err();
        assert!(matches!(err, CorrelationError::Duplicate(id) if id == "c-4"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn discard_removes_without_resolving() {
        let store = Arc::new(CorrelationStore::new());
        let pending = store.begin_async("c-5", Duration::from_secs(10)).unwrap();
        assert!(store.discard("c-5"));
        assert!(!store.discard("c-5"));
        // Sender dropped without a value: the waiter sees a timeout.
        assert!(pending.await.is_timed_out());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_resolutions_claim_exactly_once() {
        for round in 0..50 {
            let store = Arc::new(CorrelationStore::new());
            let id = format!("race-{round}");
            let pending = store.begin_async(id.clone(), Duration::from_secs(10)).unwrap();
            let claims = Arc::new(AtomicU32::new(0));

            let mut handles = Vec::new();
            for i in 0..8 {
                let store = store.clone();
                let id = id.clone();
                let claims = claims.clone();
                handles.push(tokio::spawn(async move {
                    let resolution = if i % 2 == 0 {
                        Resolution::TimedOut
                    } else {
                        Resolution::Answered(answer(&id))
                    };
                    if store.resolve(&id, resolution) {
                        claims.fetch_add(1, Ordering::SeqCst);
                    }
                }));
            }
            for handle in handles {
                handle.await.unwrap();
            }

            assert_eq!(claims.load(Ordering::SeqCst), 1);
            let _ = pending.await;
            assert!(store.is_empty());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_times_out_entries_past_grace() {
        let store = Arc::new(CorrelationStore::new());
        // An entry whose timer never ran: only the sweep can resolve it.
        let (tx, rx) = oneshot::channel();
        store.entries.insert(
            "orphan".to_string(),
            PendingEntry {
                tx,
                deadline: Instant::now() + Duration::from_millis(10),
                timer: None,
            },
        );

        assert_eq!(store.sweep_expired(Duration::from_millis(50)), 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.sweep_expired(Duration::from_millis(50)), 1);
        assert!(store.is_empty());
        assert!(rx.await.unwrap().is_timed_out());
    }
}

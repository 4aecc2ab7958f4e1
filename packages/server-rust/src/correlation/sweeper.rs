//! Periodic backstop that times out correlation entries whose deadline
//! timer never fired.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::CorrelationStore;
use crate::worker::BackgroundRunnable;

/// Tasks accepted by the sweeper besides its periodic tick.
#[derive(Debug)]
pub enum SweepTask {
    /// Run one sweep immediately.
    SweepNow,
}

/// `BackgroundRunnable` that sweeps a `CorrelationStore` on every tick.
pub struct CorrelationSweeper {
    store: Arc<CorrelationStore>,
    grace: Duration,
    swept_total: u64,
}

impl CorrelationSweeper {
    #[must_use]
    pub fn new(store: Arc<CorrelationStore>, grace: Duration) -> Self {
        Self {
            store,
            grace,
            swept_total: 0,
        }
    }

    fn sweep(&mut self) {
        let swept = self.store.sweep_expired(self.grace);
        if swept > 0 {
            self.swept_total += swept as u64;
            info!(swept, in_flight = self.store.len(), "swept expired correlation entries");
        }
    }
}

#[async_trait]
impl BackgroundRunnable for CorrelationSweeper {
    const NAME: &'static str = "correlation-sweeper";
    type Task = SweepTask;

    async fn run(&mut self, task: SweepTask) {
        match task {
            SweepTask::SweepNow => self.sweep(),
        }
    }

    async fn on_tick(&mut self) {
        self.sweep();
    }

    async fn shutdown(&mut self) {
        debug!(
            swept_total = self.swept_total,
            in_flight = self.store.len(),
            "correlation sweeper stopped"
        );
    }
}

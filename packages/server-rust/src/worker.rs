//! Housekeeping driver for the bridge.
//!
//! A `BackgroundWorker` owns one `BackgroundRunnable` on its own tokio task and
//! feeds it two kinds of work: periodic ticks (the correlation sweep) and
//! on-demand tasks submitted through a bounded channel (`Bridge::sweep_now`).

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

/// Pending on-demand tasks beyond this block `submit`.
const TASK_CAPACITY: usize = 64;

/// Work driven by a `BackgroundWorker`.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// Name used in the worker's log lines.
    const NAME: &'static str;

    type Task: Send + 'static;

    async fn run(&mut self, task: Self::Task);

    /// Periodic housekeeping. Ticks missed while a task runs are not replayed.
    async fn on_tick(&mut self) {}

    /// Runs once, after the last task or tick.
    async fn shutdown(&mut self) {}
}

/// Handle to a running housekeeping task.
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tasks: Option<mpsc::Sender<R::Task>>,
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Spawns the worker. The first tick fires one `tick_interval` after start.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(runnable: R, tick_interval: Duration) -> Self {
        let (tasks, rx) = mpsc::channel(TASK_CAPACITY);
        let (stop, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(drive(runnable, tick_interval, rx, stop_rx));
        debug!(worker = R::NAME, ?tick_interval, "worker started");

        Self {
            tasks: Some(tasks),
            stop: Some(stop),
            handle: Some(handle),
        }
    }

    /// Queues an on-demand task.
    ///
    /// # Errors
    ///
    /// Returns an error once the worker is stopped.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        let Some(tasks) = &self.tasks else {
            anyhow::bail!("{} is stopped", R::NAME);
        };
        tasks
            .send(task)
            .await
            .map_err(|_| anyhow::anyhow!("{} exited", R::NAME))
    }

    /// Stops the worker and waits for its `shutdown` hook. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.tasks = None;
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                error!(worker = R::NAME, error = %err, "worker task failed");
            }
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

async fn drive<R: BackgroundRunnable>(
    mut runnable: R,
    tick_interval: Duration,
    mut tasks: mpsc::Receiver<R::Task>,
    mut stop: oneshot::Receiver<()>,
) {
    let start = tokio::time::Instant::now() + tick_interval;
    let mut ticker = tokio::time::interval_at(start, tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut stop => break,
            task = tasks.recv() => match task {
                Some(task) => runnable.run(task).await,
                None => break,
            },
            _ = ticker.tick() => runnable.on_tick().await,
        }
    }

    runnable.shutdown().await;
    debug!(worker = R::NAME, "worker stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Task(u32),
        Tick,
        Shutdown,
    }

    struct Recorder {
        events: Arc<Mutex<Vec<Event>>>,
    }

    #[async_trait]
    impl BackgroundRunnable for Recorder {
        const NAME: &'static str = "recorder";
        type Task = u32;

        async fn run(&mut self, task: u32) {
            self.events.lock().push(Event::Task(task));
        }

        async fn on_tick(&mut self) {
            self.events.lock().push(Event::Tick);
        }

        async fn shutdown(&mut self) {
            self.events.lock().push(Event::Shutdown);
        }
    }

    fn recorder() -> (Recorder, Arc<Mutex<Vec<Event>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        (
            Recorder {
                events: events.clone(),
            },
            events,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn on_demand_tasks_run_in_submission_order() {
        let (runnable, events) = recorder();
        let mut worker = BackgroundWorker::start(runnable, Duration::from_secs(60));

        worker.submit(1).await.unwrap();
        worker.submit(2).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        worker.stop().await;

        assert_eq!(
            *events.lock(),
            vec![Event::Task(1), Event::Task(2), Event::Shutdown]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_one_interval() {
        let (runnable, events) = recorder();
        let mut worker = BackgroundWorker::start(runnable, Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(events.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(55)).await;
        worker.stop().await;

        let ticks = events.lock().iter().filter(|e| **e == Event::Tick).count();
        assert_eq!(ticks, 3);
    }

    #[tokio::test]
    async fn stopped_worker_refuses_tasks_and_stops_once() {
        let (runnable, events) = recorder();
        let mut worker = BackgroundWorker::start(runnable, Duration::from_secs(60));
        worker.stop().await;
        worker.stop().await;

        assert!(!worker.is_running());
        assert!(worker.submit(7).await.is_err());
        assert_eq!(*events.lock(), vec![Event::Shutdown]);
    }
}

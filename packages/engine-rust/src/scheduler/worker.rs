//! Background worker scheduler.
//!
//! Provides a generic `BackgroundWorker<R>` that processes tasks from an mpsc
//! channel via a `BackgroundRunnable` implementation, and `WorkerScheduler`,
//! which runs scheduled post-dispatch work on such a worker.

use std::panic::{catch_unwind, AssertUnwindSafe};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use super::{panic_message, Scheduler, Task};

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Trait for task handlers executed by `BackgroundWorker`.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// The type of task this runnable processes.
    type Task: Send + 'static;

    /// Process a single task.
    async fn run(&mut self, task: Self::Task);

    /// Called once when the worker is shutting down, after queued tasks have
    /// been drained. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Generic background worker that processes tasks via an unbounded mpsc
/// channel.
///
/// The worker spawns a tokio task that:
/// 1. Listens for tasks on the channel
/// 2. Calls `BackgroundRunnable::run()` for each task
/// 3. On stop, runs every task still queued
/// 4. Calls `BackgroundRunnable::shutdown()`
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::UnboundedSender<R::Task>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Start the background worker on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(mut runnable: R) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<R::Task>();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    task = rx.recv() => {
                        match task {
                            Some(t) => runnable.run(t).await,
                            None => break, // Channel closed.
                        }
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }

            // Tasks may still enqueue follow-up work while draining.
            rx.close();
            while let Some(t) = rx.recv().await {
                runnable.run(t).await;
            }

            runnable.shutdown().await;
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Submit a task to the worker.
    ///
    /// # Errors
    ///
    /// Returns the task back if the worker has been stopped.
    pub fn submit(&self, task: R::Task) -> Result<(), R::Task> {
        match &self.tx {
            Some(tx) => tx.send(task).map_err(|e| e.0),
            None => Err(task),
        }
    }

    /// A cloneable sender feeding this worker.
    #[must_use]
    pub fn sender(&self) -> Option<mpsc::UnboundedSender<R::Task>> {
        self.tx.clone()
    }

    /// Stop the worker gracefully, waiting for queued tasks to run.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// WorkerScheduler
// ---------------------------------------------------------------------------

/// A task with its diagnostic label.
pub struct ScheduledTask {
    pub label: String,
    pub task: Task,
}

impl std::fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Runs scheduled tasks one at a time on the blocking pool, isolating panics.
#[derive(Debug, Default)]
pub struct TaskRunner {
    completed: u64,
}

#[async_trait]
impl BackgroundRunnable for TaskRunner {
    type Task = ScheduledTask;

    async fn run(&mut self, task: ScheduledTask) {
        let ScheduledTask { label, task } = task;
        let span = tracing::trace_span!("scheduled_task", task = %label);
        // Tasks may block (inline dispatch, delays), so they never run on a
        // runtime thread.
        let outcome = tokio::task::spawn_blocking(move || {
            span.in_scope(|| {
                tracing::trace!("running scheduled task");
                catch_unwind(AssertUnwindSafe(task))
            })
        })
        .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(payload)) => tracing::error!(
                task = %label,
                panic = %panic_message(payload.as_ref()),
                "scheduled task panicked"
            ),
            Err(err) => tracing::error!(
                task = %label,
                error = %err,
                "scheduled task did not run to completion"
            ),
        }
        self.completed += 1;
    }

    async fn shutdown(&mut self) {
        tracing::debug!(completed = self.completed, "scheduler worker stopped");
    }
}

/// [`Scheduler`] that runs tasks on a dedicated tokio task.
///
/// Tasks run in FIFO order, each on tokio's blocking pool, so a task that
/// waits (a transacted dispatch, a delay) never stalls the runtime.
///
/// Work scheduled after [`stop`](Self::stop) runs inline on the caller's
/// thread so that no completion is ever lost.
pub struct WorkerScheduler {
    tx: mpsc::UnboundedSender<ScheduledTask>,
    worker: Mutex<Option<BackgroundWorker<TaskRunner>>>,
}

impl WorkerScheduler {
    /// Starts the worker on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn start() -> Self {
        let worker = BackgroundWorker::start(TaskRunner::default());
        // A freshly started worker always has a sender.
        let tx = match worker.sender() {
            Some(tx) => tx,
            None => mpsc::unbounded_channel().0,
        };
        Self {
            tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Stops the worker after it has run every queued task.
    pub async fn stop(&self) {
        let worker = self.worker.lock().take();
        if let Some(mut worker) = worker {
            worker.stop().await;
        }
    }
}

impl std::fmt::Debug for WorkerScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerScheduler")
            .field("running", &!self.tx.is_closed())
            .finish()
    }
}

impl Scheduler for WorkerScheduler {
    fn schedule(&self, task: Task, label: &str) {
        let scheduled = ScheduledTask {
            label: label.to_string(),
            task,
        };
        if let Err(rejected) = self.tx.send(scheduled) {
            let ScheduledTask { label, task } = rejected.0;
            tracing::warn!(task = %label, "scheduler stopped, running task inline");
            task();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    struct CountingRunnable {
        run_count: Arc<AtomicU32>,
        shutdown_called: Arc<AtomicU32>,
    }

    #[async_trait]
    impl BackgroundRunnable for CountingRunnable {
        type Task = String;

        async fn run(&mut self, _task: String) {
            self.run_count.fetch_add(1, Ordering::SeqCst);
        }

        async fn shutdown(&mut self) {
            self.shutdown_called.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn start_submit_and_stop() {
        let run_count = Arc::new(AtomicU32::new(0));
        let shutdown_called = Arc::new(AtomicU32::new(0));

        let mut worker = BackgroundWorker::start(CountingRunnable {
            run_count: run_count.clone(),
            shutdown_called: shutdown_called.clone(),
        });

        worker.submit("task-1".to_string()).unwrap();
        worker.submit("task-2".to_string()).unwrap();
        worker.submit("task-3".to_string()).unwrap();

        worker.stop().await;

        assert_eq!(run_count.load(Ordering::SeqCst), 3);
        assert_eq!(shutdown_called.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn submit_after_stop_returns_task() {
        let mut worker = BackgroundWorker::start(CountingRunnable {
            run_count: Arc::new(AtomicU32::new(0)),
            shutdown_called: Arc::new(AtomicU32::new(0)),
        });
        worker.stop().await;

        let result = worker.submit("late-task".to_string());
        assert_eq!(result, Err("late-task".to_string()));
    }

    #[tokio::test]
    async fn worker_scheduler_runs_scheduled_task() {
        let scheduler = WorkerScheduler::start();
        let (tx, rx) = oneshot::channel();
        scheduler.schedule(
            Box::new(move || {
                let _ = tx.send("ran");
            }),
            "ping",
        );
        let ran = tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ran, "ran");
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn worker_scheduler_survives_panicking_task() {
        let scheduler = WorkerScheduler::start();
        let count = Arc::new(AtomicU32::new(0));
        scheduler.schedule(Box::new(|| panic!("boom")), "panics");
        let c = Arc::clone(&count);
        scheduler.schedule(
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
            "after",
        );
        scheduler.stop().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn worker_scheduler_runs_inline_after_stop() {
        let scheduler = WorkerScheduler::start();
        scheduler.stop().await;

        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        scheduler.schedule(
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
            "late",
        );
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn blocking_task_does_not_stall_the_runtime() {
        let scheduler = WorkerScheduler::start();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let (result_tx, result_rx) = oneshot::channel();
        scheduler.schedule(
            Box::new(move || {
                let released = release_rx.recv_timeout(Duration::from_secs(5)).is_ok();
                let _ = result_tx.send(released);
            }),
            "blocking",
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        release_tx.send(()).unwrap();

        assert!(result_rx.await.unwrap());
        scheduler.stop().await;
    }
}

//! Engine lifecycle and shutdown control.
//!
//! Uses `ArcSwap` for lock-free lifecycle transitions. The controller is the
//! default [`ShutdownStrategy`] queried by every executor's gate check, and the
//! default [`LifecycleStatus`] consulted by route-policy advices.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::RwLock;
use tokio::sync::watch;

use crate::advices::inflight::InflightRepository;
use crate::executor::ExecutorId;

/// Decides whether an executor must refuse new work because the engine is
/// being forced down.
pub trait ShutdownStrategy: Send + Sync {
    /// Returns `true` if `executor` must reject the exchange it is about to run.
    fn force_shutdown(&self, executor: &ExecutorId) -> bool;
}

/// Reports whether the owning engine is shutting down.
pub trait LifecycleStatus: Send + Sync {
    /// `true` while stopping and once stopped.
    fn is_stopping(&self) -> bool;
}

/// Engine lifecycle state.
///
/// State machine: Starting -> Running -> Stopping -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Routes are being assembled; nothing is running yet.
    Starting,
    /// Exchanges are being routed.
    Running,
    /// Draining in-flight exchanges.
    Stopping,
    /// All in-flight exchanges completed.
    Stopped,
}

/// Controls graceful and forced shutdown.
///
/// 1. `set_running()` once routes are assembled
/// 2. `trigger_shutdown()` moves to `Stopping` and signals listeners
/// 3. `force_shutdown_now()` makes gate checks reject new exchanges, either on
///    every executor or on a given set
/// 4. `wait_for_drain()` waits until the in-flight repository is empty
#[derive(Debug)]
pub struct ShutdownController {
    shutdown_signal: watch::Sender<bool>,
    state: Arc<ArcSwap<LifecycleState>>,
    forced: AtomicBool,
    /// Executors affected by a forced shutdown. `None` means all of them.
    forced_scope: RwLock<Option<HashSet<ExecutorId>>>,
}

impl ShutdownController {
    /// Creates a controller in the `Starting` state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            shutdown_signal: tx,
            state: Arc::new(ArcSwap::from_pointee(LifecycleState::Starting)),
            forced: AtomicBool::new(false),
            forced_scope: RwLock::new(None),
        }
    }

    pub fn set_running(&self) {
        self.state.store(Arc::new(LifecycleState::Running));
    }

    #[must_use]
    pub fn lifecycle_state(&self) -> LifecycleState {
        **self.state.load()
    }

    /// Shared handle to the lifecycle state.
    #[must_use]
    pub fn state_handle(&self) -> Arc<ArcSwap<LifecycleState>> {
        Arc::clone(&self.state)
    }

    /// Receiver notified when shutdown is triggered.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    /// Starts a graceful shutdown: transitions to `Stopping` and signals
    /// receivers. Executors keep running exchanges until forced.
    pub fn trigger_shutdown(&self) {
        self.state.store(Arc::new(LifecycleState::Stopping));
        // Ignore send errors -- receivers may have been dropped
        let _ = self.shutdown_signal.send(true);
    }

    /// Forces shutdown: gate checks on the given executors (all when `None`)
    /// start rejecting exchanges. Implies [`trigger_shutdown`](Self::trigger_shutdown).
    pub fn force_shutdown_now(&self, scope: Option<Vec<ExecutorId>>) {
        *self.forced_scope.write() = scope.map(|ids| ids.into_iter().collect());
        self.forced.store(true, Ordering::Release);
        self.trigger_shutdown();
    }

    /// Waits until no exchange is in flight, up to `timeout`.
    ///
    /// Returns `true` and transitions to `Stopped` if the repository drained.
    /// Returns `false` if the timeout expired; the state stays `Stopping`.
    pub async fn wait_for_drain(
        &self,
        inflight: &dyn InflightRepository,
        timeout: Duration,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if inflight.size() == 0 {
                self.state.store(Arc::new(LifecycleState::Stopped));
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }

            // Poll at 10ms intervals to avoid busy-waiting
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownStrategy for ShutdownController {
    fn force_shutdown(&self, executor: &ExecutorId) -> bool {
        if !self.forced.load(Ordering::Acquire) {
            return false;
        }
        match &*self.forced_scope.read() {
            Some(scope) => scope.contains(executor),
            None => true,
        }
    }
}

impl LifecycleStatus for ShutdownController {
    fn is_stopping(&self) -> bool {
        matches!(
            self.lifecycle_state(),
            LifecycleState::Stopping | LifecycleState::Stopped
        )
    }
}

#[cfg(test)]
mod tests {
    use switchyard_core::Exchange;

    use super::*;
    use crate::advices::inflight::DefaultInflightRepository;

    #[test]
    fn initial_state_is_starting_and_not_forced() {
        let controller = ShutdownController::new();
        assert_eq!(controller.lifecycle_state(), LifecycleState::Starting);
        assert!(!controller.force_shutdown(&ExecutorId::new("any")));
        assert!(!controller.is_stopping());
    }

    #[test]
    fn lifecycle_transitions_starting_running_stopping() {
        let controller = ShutdownController::new();
        controller.set_running();
        assert_eq!(controller.lifecycle_state(), LifecycleState::Running);
        assert!(!controller.is_stopping());

        controller.trigger_shutdown();
        assert_eq!(controller.lifecycle_state(), LifecycleState::Stopping);
        assert!(controller.is_stopping());
        // Graceful shutdown alone does not reject work.
        assert!(!controller.force_shutdown(&ExecutorId::new("any")));
    }

    #[test]
    fn forced_shutdown_without_scope_rejects_everywhere() {
        let controller = ShutdownController::new();
        controller.force_shutdown_now(None);
        assert!(controller.force_shutdown(&ExecutorId::new("a")));
        assert!(controller.force_shutdown(&ExecutorId::new("b")));
        assert!(controller.is_stopping());
    }

    #[test]
    fn forced_shutdown_with_scope_only_rejects_listed_executors() {
        let controller = ShutdownController::new();
        controller.force_shutdown_now(Some(vec![ExecutorId::new("a")]));
        assert!(controller.force_shutdown(&ExecutorId::new("a")));
        assert!(!controller.force_shutdown(&ExecutorId::new("b")));
    }

    #[tokio::test]
    async fn shutdown_receiver_notified() {
        let controller = ShutdownController::new();
        let mut rx = controller.shutdown_receiver();
        assert!(!*rx.borrow());

        controller.trigger_shutdown();

        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn wait_for_drain_immediate_success() {
        let controller = ShutdownController::new();
        let inflight = DefaultInflightRepository::new();
        controller.set_running();
        controller.trigger_shutdown();

        let drained = controller
            .wait_for_drain(&inflight, Duration::from_secs(1))
            .await;
        assert!(drained);
        assert_eq!(controller.lifecycle_state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn wait_for_drain_with_active_exchange() {
        let controller = Arc::new(ShutdownController::new());
        let inflight = Arc::new(DefaultInflightRepository::new());
        let exchange = Exchange::new();
        inflight.add(&exchange, "route-1").unwrap();
        controller.trigger_shutdown();

        let remover = {
            let inflight = Arc::clone(&inflight);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                inflight.remove(&exchange, "route-1").unwrap();
            })
        };

        let drained = controller
            .wait_for_drain(inflight.as_ref(), Duration::from_secs(2))
            .await;
        assert!(drained);
        assert_eq!(controller.lifecycle_state(), LifecycleState::Stopped);

        remover.await.unwrap();
    }

    #[tokio::test]
    async fn wait_for_drain_timeout() {
        let controller = ShutdownController::new();
        let inflight = DefaultInflightRepository::new();
        inflight.add(&Exchange::new(), "route-1").unwrap();
        controller.trigger_shutdown();

        let drained = controller
            .wait_for_drain(&inflight, Duration::from_millis(50))
            .await;
        assert!(!drained);
        assert_eq!(controller.lifecycle_state(), LifecycleState::Stopping);
    }
}

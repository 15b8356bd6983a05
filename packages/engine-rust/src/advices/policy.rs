//! Route policy notifications.

use std::sync::Arc;

use switchyard_core::{Exchange, RouteContext};

use crate::advice::Advice;
use crate::shutdown::LifecycleStatus;

/// Pluggable policy notified when exchanges begin and finish a route.
///
/// Used as `Arc<dyn RoutePolicy>`.
pub trait RoutePolicy: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        "route-policy"
    }

    /// A policy that is not running is skipped.
    fn is_run_allowed(&self) -> bool {
        true
    }

    /// # Errors
    ///
    /// Errors are logged and ignored by the caller.
    fn on_exchange_begin(&self, route: &RouteContext, exchange: &Exchange) -> anyhow::Result<()>;

    /// # Errors
    ///
    /// Errors are logged and ignored by the caller.
    fn on_exchange_done(&self, route: &RouteContext, exchange: &Exchange) -> anyhow::Result<()>;
}

/// Fans begin/done notifications out to every configured policy.
///
/// Policy failures never fail the exchange. Done notifications are skipped
/// while the engine is stopping so a policy cannot restart consumers during
/// shutdown.
pub struct RoutePolicyAdvice {
    route: RouteContext,
    policies: Vec<Arc<dyn RoutePolicy>>,
    status: Arc<dyn LifecycleStatus>,
}

impl RoutePolicyAdvice {
    #[must_use]
    pub fn new(
        route: RouteContext,
        policies: Vec<Arc<dyn RoutePolicy>>,
        status: Arc<dyn LifecycleStatus>,
    ) -> Self {
        Self {
            route,
            policies,
            status,
        }
    }

    /// Adds a policy after construction.
    pub fn add(&mut self, policy: Arc<dyn RoutePolicy>) {
        self.policies.push(policy);
    }
}

impl Advice for RoutePolicyAdvice {
    type State = ();

    fn name(&self) -> &'static str {
        "route-policy"
    }

    fn before(&self, exchange: &Exchange) -> anyhow::Result<()> {
        for policy in self.policies.iter().filter(|p| p.is_run_allowed()) {
            if let Err(err) = policy.on_exchange_begin(&self.route, exchange) {
                tracing::warn!(
                    policy = policy.name(),
                    route = %self.route,
                    error = %err,
                    "error during on_exchange_begin on route policy, ignoring"
                );
            }
        }
        Ok(())
    }

    fn after(&self, exchange: &Exchange, (): ()) -> anyhow::Result<()> {
        if self.status.is_stopping() {
            return Ok(());
        }
        for policy in self.policies.iter().filter(|p| p.is_run_allowed()) {
            if let Err(err) = policy.on_exchange_done(&self.route, exchange) {
                tracing::warn!(
                    policy = policy.name(),
                    route = %self.route,
                    error = %err,
                    "error during on_exchange_done on route policy, ignoring"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::shutdown::ShutdownController;

    struct Recording {
        label: &'static str,
        allowed: AtomicBool,
        failing: bool,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Recording {
        fn new(label: &'static str, calls: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                label,
                allowed: AtomicBool::new(true),
                failing: false,
                calls: Arc::clone(calls),
            }
        }
    }

    impl RoutePolicy for Recording {
        fn is_run_allowed(&self) -> bool {
            self.allowed.load(Ordering::SeqCst)
        }

        fn on_exchange_begin(&self, route: &RouteContext, _exchange: &Exchange) -> anyhow::Result<()> {
            self.calls.lock().push(format!("{}:begin:{route}", self.label));
            if self.failing {
                anyhow::bail!("policy failed");
            }
            Ok(())
        }

        fn on_exchange_done(&self, route: &RouteContext, _exchange: &Exchange) -> anyhow::Result<()> {
            self.calls.lock().push(format!("{}:done:{route}", self.label));
            if self.failing {
                anyhow::bail!("policy failed");
            }
            Ok(())
        }
    }

    fn advice(policies: Vec<Arc<dyn RoutePolicy>>, status: Arc<ShutdownController>) -> RoutePolicyAdvice {
        RoutePolicyAdvice::new(RouteContext::new("r1"), policies, status)
    }

    #[test]
    fn notifies_all_allowed_policies() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let a = Arc::new(Recording::new("a", &calls));
        let b = Arc::new(Recording::new("b", &calls));
        b.allowed.store(false, Ordering::SeqCst);
        let advice = advice(
            vec![a as Arc<dyn RoutePolicy>, b as Arc<dyn RoutePolicy>],
            Arc::new(ShutdownController::new()),
        );

        let exchange = Exchange::new();
        advice.before(&exchange).unwrap();
        advice.after(&exchange, ()).unwrap();

        assert_eq!(*calls.lock(), vec!["a:begin:r1", "a:done:r1"]);
    }

    #[test]
    fn policy_errors_are_swallowed() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut failing = Recording::new("a", &calls);
        failing.failing = true;
        let b = Recording::new("b", &calls);
        let advice = advice(
            vec![
                Arc::new(failing) as Arc<dyn RoutePolicy>,
                Arc::new(b) as Arc<dyn RoutePolicy>,
            ],
            Arc::new(ShutdownController::new()),
        );

        let exchange = Exchange::new();
        assert!(advice.before(&exchange).is_ok());
        assert!(advice.after(&exchange, ()).is_ok());
        assert_eq!(calls.lock().len(), 4);
        assert!(!exchange.has_error());
    }

    #[test]
    fn done_skipped_while_stopping() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let controller = Arc::new(ShutdownController::new());
        let advice = advice(
            vec![Arc::new(Recording::new("a", &calls)) as Arc<dyn RoutePolicy>],
            Arc::clone(&controller),
        );

        let exchange = Exchange::new();
        advice.before(&exchange).unwrap();
        controller.trigger_shutdown();
        advice.after(&exchange, ()).unwrap();

        assert_eq!(*calls.lock(), vec!["a:begin:r1"]);
    }
}

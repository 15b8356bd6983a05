//! Unit-of-work contract: the tracking scope of one exchange through a route.

use std::fmt;
use std::sync::Arc;

use crate::continuation::Continuation;
use crate::exchange::Exchange;
use crate::route::RouteContext;

/// Callback notified once when a unit of work is done.
pub trait Synchronization: Send + Sync {
    /// The exchange completed without an error.
    fn on_complete(&self, exchange: &Exchange);

    /// The exchange completed with an error on it.
    fn on_failure(&self, exchange: &Exchange);
}

/// Tracking scope of one exchange through one route or sub-route.
///
/// A unit of work is started once by whoever created it and terminated by a
/// single [`done`](Self::done) call from that same creator; `done` must be
/// idempotent because consumers may terminate it independently. It owns a
/// stack of [`RouteContext`]s that routing steps push on entry and pop on exit.
///
/// Used as `Arc<dyn UnitOfWork>`.
pub trait UnitOfWork: Send + Sync + fmt::Debug {
    /// Unique identifier of this unit of work.
    fn id(&self) -> &str;

    /// Starts the unit of work. Called once, right after creation.
    ///
    /// # Errors
    ///
    /// Returns an error if the scope cannot be started.
    fn start(&self) -> anyhow::Result<()>;

    /// Terminates the unit of work, running registered synchronizations.
    /// Subsequent calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns an error if termination fails; callers log and continue.
    fn done(&self, exchange: &Exchange) -> anyhow::Result<()>;

    /// Whether [`done`](Self::done) has already run.
    fn is_done(&self) -> bool;

    /// Registers a callback run once when the unit of work is done.
    fn add_synchronization(&self, synchronization: Arc<dyn Synchronization>);

    /// Pushes the route context of a route the exchange is entering.
    fn push_route_context(&self, context: RouteContext);

    /// Pops the most recently pushed route context.
    fn pop_route_context(&self) -> Option<RouteContext>;

    /// The route context currently on top of the stack.
    fn route_context(&self) -> Option<RouteContext>;

    /// Notified before the exchange is routed through `route`.
    fn before_route(&self, _exchange: &Exchange, _route: &RouteContext) {}

    /// Notified after the exchange has been routed through `route`.
    fn after_route(&self, _exchange: &Exchange, _route: &RouteContext) {}

    /// Lets the unit of work decorate the continuation handed to an
    /// asynchronously dispatched step, e.g. to carry context across threads.
    fn before_process(&self, _exchange: &Exchange, done: Continuation) -> Continuation {
        done
    }

    /// Notified once the dispatching call has returned control, independently
    /// of when the step completes.
    fn after_process(&self, _exchange: &Exchange) {}

    /// Creates a child unit of work with an independent lifecycle that
    /// cooperates with this one.
    fn create_child(&self, exchange: &Exchange) -> Arc<dyn UnitOfWork>;

    /// Begins a savepoint-style nested scope within this unit of work.
    fn begin_sub(&self, exchange: &Exchange);

    /// Ends the innermost nested scope.
    fn end_sub(&self, exchange: &Exchange);
}

//! Default unit of work and its factory.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use switchyard_core::{Continuation, Exchange, RouteContext, Synchronization, UnitOfWork};

use crate::scheduler::panic_message;

/// Creates the unit of work for an exchange entering a route without one.
pub trait UnitOfWorkFactory: Send + Sync {
    fn create_unit_of_work(&self, exchange: &Exchange) -> Arc<dyn UnitOfWork>;
}

/// Factory producing [`DefaultUnitOfWork`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultUnitOfWorkFactory;

impl UnitOfWorkFactory for DefaultUnitOfWorkFactory {
    fn create_unit_of_work(&self, exchange: &Exchange) -> Arc<dyn UnitOfWork> {
        DefaultUnitOfWork::new(exchange)
    }
}

/// Terminates `uow` unless a consumer already did, logging and swallowing
/// any failure.
pub fn done_unit_of_work(uow: &dyn UnitOfWork, exchange: &Exchange) {
    if uow.is_done() {
        return;
    }
    if let Err(err) = uow.done(exchange) {
        tracing::warn!(
            exchange_id = %exchange.id(),
            unit_of_work = uow.id(),
            error = %err,
            "error while terminating unit of work, continuing"
        );
    }
}

#[derive(Debug)]
struct SubScope {
    failed_on_entry: bool,
}

/// Unit of work keeping a route-context stack, savepoint-style sub scopes and
/// synchronizations run once on [`done`](UnitOfWork::done).
///
/// Carries an `exchange` tracing span that is re-entered when an
/// asynchronously dispatched step completes on another thread.
pub struct DefaultUnitOfWork {
    id: String,
    exchange_id: String,
    me: Weak<DefaultUnitOfWork>,
    parent: Option<Arc<dyn UnitOfWork>>,
    started: AtomicBool,
    done: AtomicBool,
    routes: Mutex<Vec<RouteContext>>,
    subs: Mutex<Vec<SubScope>>,
    synchronizations: Mutex<Vec<Arc<dyn Synchronization>>>,
    span: tracing::Span,
}

impl DefaultUnitOfWork {
    #[must_use]
    pub fn new(exchange: &Exchange) -> Arc<Self> {
        Self::build(exchange, None)
    }

    fn build(exchange: &Exchange, parent: Option<Arc<dyn UnitOfWork>>) -> Arc<Self> {
        let id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("exchange", exchange_id = %exchange.id(), unit_of_work = %id);
        Arc::new_cyclic(|me| Self {
            id,
            exchange_id: exchange.id().to_string(),
            me: me.clone(),
            parent,
            started: AtomicBool::new(false),
            done: AtomicBool::new(false),
            routes: Mutex::new(Vec::new()),
            subs: Mutex::new(Vec::new()),
            synchronizations: Mutex::new(Vec::new()),
            span,
        })
    }

    /// Parent this unit of work was minted from, if it is a child.
    #[must_use]
    pub fn parent(&self) -> Option<&Arc<dyn UnitOfWork>> {
        self.parent.as_ref()
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Depth of the route-context stack.
    #[must_use]
    pub fn route_depth(&self) -> usize {
        self.routes.lock().len()
    }

    /// Number of open sub scopes.
    #[must_use]
    pub fn sub_depth(&self) -> usize {
        self.subs.lock().len()
    }
}

impl UnitOfWork for DefaultUnitOfWork {
    fn id(&self) -> &str {
        &self.id
    }

    fn start(&self) -> anyhow::Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            anyhow::bail!("unit of work {} already started", self.id);
        }
        tracing::trace!(unit_of_work = %self.id, exchange_id = %self.exchange_id, "unit of work started");
        Ok(())
    }

    fn done(&self, exchange: &Exchange) -> anyhow::Result<()> {
        if self.done.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let failed = exchange.has_error();
        let synchronizations = std::mem::take(&mut *self.synchronizations.lock());
        for sync in synchronizations {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                if failed {
                    sync.on_failure(exchange);
                } else {
                    sync.on_complete(exchange);
                }
            }));
            if let Err(payload) = outcome {
                tracing::warn!(
                    unit_of_work = %self.id,
                    panic = %panic_message(payload.as_ref()),
                    "synchronization panicked, continuing"
                );
            }
        }
        tracing::trace!(unit_of_work = %self.id, failed, "unit of work done");
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    fn add_synchronization(&self, synchronization: Arc<dyn Synchronization>) {
        self.synchronizations.lock().push(synchronization);
    }

    fn push_route_context(&self, context: RouteContext) {
        self.routes.lock().push(context);
    }

    fn pop_route_context(&self) -> Option<RouteContext> {
        self.routes.lock().pop()
    }

    fn route_context(&self) -> Option<RouteContext> {
        let own = self.routes.lock().last().cloned();
        own.or_else(|| self.parent.as_ref().and_then(|p| p.route_context()))
    }

    fn before_process(&self, _exchange: &Exchange, done: Continuation) -> Continuation {
        let span = self.span.clone();
        done.wrap(move |done_sync, done| span.in_scope(|| done.complete(done_sync)))
    }

    fn create_child(&self, exchange: &Exchange) -> Arc<dyn UnitOfWork> {
        let parent = self.me.upgrade().map(|me| me as Arc<dyn UnitOfWork>);
        Self::build(exchange, parent)
    }

    fn begin_sub(&self, exchange: &Exchange) {
        self.subs.lock().push(SubScope {
            failed_on_entry: exchange.has_error(),
        });
    }

    fn end_sub(&self, exchange: &Exchange) {
        let Some(scope) = self.subs.lock().pop() else {
            tracing::warn!(unit_of_work = %self.id, "end_sub without a matching begin_sub");
            return;
        };
        if !scope.failed_on_entry && exchange.has_error() {
            tracing::debug!(
                unit_of_work = %self.id,
                exchange_id = %exchange.id(),
                "sub unit of work failed"
            );
        }
    }
}

impl std::fmt::Debug for DefaultUnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultUnitOfWork")
            .field("id", &self.id)
            .field("exchange_id", &self.exchange_id)
            .field("has_parent", &self.parent.is_some())
            .field("done", &self.is_done())
            .finish_non_exhaustive()
    }
}

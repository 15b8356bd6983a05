//! The advice-chain executor: runs a routing step wrapped by its advices.
//!
//! For every exchange the executor
//! 1. consults the [gate](crate::gate),
//! 2. runs each advice's `before` in chain order, keeping the returned states
//!    in an [`AdviceStates`] arena,
//! 3. dispatches the wrapped step, inline for transacted exchanges and through
//!    its own `process` otherwise,
//! 4. runs each `after` in reverse order once the step completes, from
//!    whichever thread completes it,
//! 5. on the asynchronous path, schedules the unit-of-work `after_process`
//!    hook on the injected [`Scheduler`] instead of calling it on the current
//!    stack.
//!
//! Failures never escape `process`; they are recorded on the exchange.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use switchyard_core::{Continuation, Exchange, Processor};

use crate::advice::{Advice, AdviceChain, AdviceStates, ErasedAdvice};
use crate::config::BeforeFailurePolicy;
use crate::context::EngineContext;
use crate::error::EngineError;
use crate::gate::{self, GateDecision};
use crate::scheduler::{panic_message, Scheduler};
use crate::shutdown::ShutdownStrategy;

// ---------------------------------------------------------------------------
// ExecutorId
// ---------------------------------------------------------------------------

/// Identity of an executor, reported to the shutdown strategy and in
/// rejection errors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutorId(String);

impl ExecutorId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExecutorId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ExecutorId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// AdviceChainExecutor
// ---------------------------------------------------------------------------

/// Wraps a [`Processor`] with an ordered chain of advices.
///
/// Advices are added with `&mut self`, so the chain is fixed once the executor
/// is shared (typically behind an `Arc`) for processing.
pub struct AdviceChainExecutor {
    id: ExecutorId,
    processor: Option<Arc<dyn Processor>>,
    chain: Arc<AdviceChain>,
    shutdown: Arc<dyn ShutdownStrategy>,
    scheduler: Arc<dyn Scheduler>,
    before_failure_policy: BeforeFailurePolicy,
}

impl AdviceChainExecutor {
    /// Creates an executor with an empty chain.
    ///
    /// Without a `processor` every exchange completes immediately.
    #[must_use]
    pub fn new(
        id: impl Into<ExecutorId>,
        processor: Option<Arc<dyn Processor>>,
        ctx: &EngineContext,
    ) -> Self {
        Self {
            id: id.into(),
            processor,
            chain: Arc::new(AdviceChain::new()),
            shutdown: Arc::clone(&ctx.shutdown),
            scheduler: Arc::clone(&ctx.scheduler),
            before_failure_policy: ctx.config.before_failure_policy,
        }
    }

    /// Registers an advice, keeping the chain sorted by priority.
    pub fn add_advice<A: Advice>(&mut self, advice: A) -> &mut Self {
        Arc::make_mut(&mut self.chain).register(advice);
        self
    }

    /// Registers an advice that is shared with other executors.
    pub fn add_shared_advice(&mut self, advice: Arc<dyn ErasedAdvice>) -> &mut Self {
        Arc::make_mut(&mut self.chain).register_shared(advice);
        self
    }

    /// Builder form of [`add_advice`](Self::add_advice).
    #[must_use]
    pub fn with_advice<A: Advice>(mut self, advice: A) -> Self {
        self.add_advice(advice);
        self
    }

    #[must_use]
    pub fn id(&self) -> &ExecutorId {
        &self.id
    }

    #[must_use]
    pub fn chain(&self) -> &AdviceChain {
        &self.chain
    }

    #[must_use]
    pub fn processor(&self) -> Option<&Arc<dyn Processor>> {
        self.processor.as_ref()
    }

    /// Runs the inline path: the wrapped step on this thread, then the
    /// continuation.
    fn dispatch_inline(&self, processor: &dyn Processor, exchange: &Exchange, callback: Continuation) {
        tracing::trace!(
            exchange_id = %exchange.id(),
            executor = %self.id,
            "transacted exchange must be routed synchronously"
        );
        let result = guarded(|| format!("processor of {}", self.id), || {
            processor.process_sync(exchange)
        });
        if let Err(err) = result {
            exchange.set_error(err);
        }
        callback.complete(true);
    }

    /// Runs the asynchronous path and schedules the post-dispatch hook.
    fn dispatch_async(&self, processor: &dyn Processor, exchange: &Exchange, callback: Continuation) {
        let uow = exchange.unit_of_work();
        let callback = match &uow {
            Some(uow) => uow.before_process(exchange, callback),
            None => callback,
        };

        tracing::trace!(
            exchange_id = %exchange.id(),
            executor = %self.id,
            "processing exchange"
        );
        processor.process(exchange, callback);

        let label = format!(
            "{} - unit of work after process - {}",
            self.id,
            exchange.id()
        );
        let exchange = exchange.clone();
        self.scheduler.schedule(
            Box::new(move || {
                if let Some(uow) = uow {
                    uow.after_process(&exchange);
                }
                tracing::trace!(
                    exchange_id = %exchange.id(),
                    "exchange processed and is continued routed asynchronously"
                );
            }),
            &label,
        );
    }
}

impl Processor for AdviceChainExecutor {
    fn process(&self, exchange: &Exchange, done: Continuation) -> bool {
        let Some(processor) = self.processor.as_deref() else {
            done.complete(true);
            return true;
        };
        if gate::check(exchange, &self.id, self.shutdown.as_ref()) == GateDecision::Reject {
            done.complete(true);
            return true;
        }

        let mut states = AdviceStates::with_len(self.chain.len());
        for (index, advice) in self.chain.iter().enumerate() {
            let result = guarded(|| format!("advice {} before", advice.name()), || {
                advice.before_erased(exchange)
            });
            match result {
                Ok(state) => states.set(index, state),
                Err(err) => {
                    tracing::debug!(
                        exchange_id = %exchange.id(),
                        executor = %self.id,
                        advice = advice.name(),
                        error = %err,
                        "advice before failed"
                    );
                    if self.before_failure_policy == BeforeFailurePolicy::Unwind {
                        run_after(&self.chain, exchange, &mut states);
                    }
                    exchange.set_error(err);
                    done.complete(true);
                    return true;
                }
            }
        }

        let chain = Arc::clone(&self.chain);
        let owner = exchange.clone();
        let callback = done.wrap(move |done_sync, done| {
            run_after(&chain, &owner, &mut states);
            done.complete(done_sync);
        });

        if exchange.is_transacted() {
            self.dispatch_inline(processor, exchange, callback);
            true
        } else {
            self.dispatch_async(processor, exchange, callback);
            false
        }
    }
}

impl fmt::Debug for AdviceChainExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdviceChainExecutor")
            .field("id", &self.id)
            .field("chain", &self.chain)
            .field("has_processor", &self.processor.is_some())
            .field("before_failure_policy", &self.before_failure_policy)
            .finish()
    }
}

/// Runs `after` in reverse chain order for every advice holding a state.
///
/// Each call is isolated: a failure overwrites the exchange error and the
/// remaining advices still run.
fn run_after(chain: &AdviceChain, exchange: &Exchange, states: &mut AdviceStates) {
    for (index, advice) in chain.iter().enumerate().rev() {
        let Some(state) = states.take(index) else {
            continue;
        };
        let result = guarded(|| format!("advice {} after", advice.name()), || {
            advice.after_erased(exchange, state)
        });
        if let Err(err) = result {
            tracing::debug!(
                exchange_id = %exchange.id(),
                advice = advice.name(),
                error = %err,
                "advice after failed"
            );
            exchange.set_error(err);
        }
    }
}

/// Calls `f`, turning a panic into [`EngineError::Panicked`].
fn guarded<T>(
    what: impl FnOnce() -> String,
    f: impl FnOnce() -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(EngineError::Panicked {
            what: what(),
            message: panic_message(payload.as_ref()),
        }
        .into()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread::{self, ThreadId};
    use parking_lot::Mutex;
    use switchyard_core::exchange::properties;
    use switchyard_core::processor_fn;

    use super::*;
    use crate::config::EngineConfig;
    use crate::scheduler::{Task, TrampolineScheduler};

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recording {
        name: &'static str,
        priority: Option<i32>,
        log: Log,
        fail_before: bool,
        fail_after: bool,
        after_threads: Option<Arc<Mutex<Vec<ThreadId>>>>,
    }

    impl Recording {
        fn new(name: &'static str, log: &Log) -> Self {
            Self {
                name,
                priority: None,
                log: Arc::clone(log),
                fail_before: false,
                fail_after: false,
                after_threads: None,
            }
        }

        fn priority(mut self, priority: i32) -> Self {
            self.priority = Some(priority);
            self
        }

        fn failing_before(mut self) -> Self {
            self.fail_before = true;
            self
        }

        fn failing_after(mut self) -> Self {
            self.fail_after = true;
            self
        }
    }

    impl Advice for Recording {
        type State = &'static str;

        fn name(&self) -> &'static str {
            self.name
        }

        fn before(&self, _exchange: &Exchange) -> anyhow::Result<&'static str> {
            self.log.lock().push(format!("before:{}", self.name));
            if self.fail_before {
                anyhow::bail!("{} before failed", self.name);
            }
            Ok(self.name)
        }

        fn after(&self, _exchange: &Exchange, state: &'static str) -> anyhow::Result<()> {
            assert_eq!(state, self.name);
            self.log.lock().push(format!("after:{}", self.name));
            if let Some(threads) = &self.after_threads {
                threads.lock().push(thread::current().id());
            }
            if self.fail_after {
                anyhow::bail!("{} after failed", self.name);
            }
            Ok(())
        }

        fn priority(&self) -> Option<i32> {
            self.priority
        }
    }

    /// Scheduler that records labels and runs tasks immediately.
    #[derive(Default)]
    struct CountingScheduler {
        labels: Mutex<Vec<String>>,
    }

    impl Scheduler for CountingScheduler {
        fn schedule(&self, task: Task, label: &str) {
            self.labels.lock().push(label.to_string());
            task();
        }
    }

    struct Forced;

    impl ShutdownStrategy for Forced {
        fn force_shutdown(&self, _executor: &ExecutorId) -> bool {
            true
        }
    }

    fn ok_step() -> Arc<dyn Processor> {
        Arc::new(processor_fn(|_| Ok(())))
    }

    fn log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().clone()
    }

    /// Continuation counting completions and remembering the last flag.
    fn counting_done() -> (Continuation, Arc<AtomicUsize>, Arc<Mutex<Option<bool>>>) {
        let count = Arc::new(AtomicUsize::new(0));
        let flag = Arc::new(Mutex::new(None));
        let (c, f) = (Arc::clone(&count), Arc::clone(&flag));
        let done = Continuation::new(move |sync| {
            c.fetch_add(1, Ordering::SeqCst);
            *f.lock() = Some(sync);
        });
        (done, count, flag)
    }

    // -- ordering -----------------------------------------------------------

    #[test]
    fn before_ascending_after_reverse() {
        let log = log();
        let executor = AdviceChainExecutor::new("ex", Some(ok_step()), &EngineContext::default())
            .with_advice(Recording::new("a", &log).priority(10))
            .with_advice(Recording::new("b", &log).priority(5));

        let (done, count, flag) = counting_done();
        executor.process(&Exchange::new(), done);

        assert_eq!(
            entries(&log),
            vec!["before:b", "before:a", "after:a", "after:b"]
        );
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(*flag.lock(), Some(true));
    }

    #[test]
    fn equal_priorities_keep_registration_order() {
        let log = log();
        let executor = AdviceChainExecutor::new("ex", Some(ok_step()), &EngineContext::default())
            .with_advice(Recording::new("a", &log))
            .with_advice(Recording::new("b", &log))
            .with_advice(Recording::new("c", &log));

        executor.process(&Exchange::new(), Continuation::noop());

        assert_eq!(
            entries(&log),
            vec!["before:a", "before:b", "before:c", "after:c", "after:b", "after:a"]
        );
    }

    // -- gate ---------------------------------------------------------------

    #[test]
    fn stop_flag_skips_all_advices() {
        let log = log();
        let executor = AdviceChainExecutor::new("ex", Some(ok_step()), &EngineContext::default())
            .with_advice(Recording::new("a", &log));

        let exchange = Exchange::new();
        exchange.set_property(properties::ROUTE_STOP, true);
        let (done, count, flag) = counting_done();

        assert!(executor.process(&exchange, done));
        assert!(entries(&log).is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(*flag.lock(), Some(true));
        assert!(!exchange.has_error());
    }

    #[test]
    fn forced_shutdown_rejects_with_error() {
        let log = log();
        let ctx = EngineContext::new(
            EngineConfig::default(),
            Arc::new(Forced),
            Arc::new(TrampolineScheduler::new()),
        );
        let executor = AdviceChainExecutor::new("route-1/step-3", Some(ok_step()), &ctx)
            .with_advice(Recording::new("a", &log));

        let exchange = Exchange::new();
        let (done, count, _) = counting_done();
        assert!(executor.process(&exchange, done));

        assert!(entries(&log).is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        let err = exchange.error().unwrap();
        let msg = err.to_string();
        assert!(msg.contains("route-1/step-3"));
        assert!(msg.contains(exchange.id()));
    }

    #[test]
    fn missing_processor_completes_immediately() {
        let log = log();
        let executor = AdviceChainExecutor::new("ex", None, &EngineContext::default())
            .with_advice(Recording::new("a", &log));

        let (done, count, flag) = counting_done();
        assert!(executor.process(&Exchange::new(), done));
        assert!(entries(&log).is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(*flag.lock(), Some(true));
    }

    // -- before failures ----------------------------------------------------

    #[test]
    fn before_failure_short_circuits_and_skips_after() {
        let log = log();
        let step_calls = Arc::new(AtomicUsize::new(0));
        let calls = Arc::clone(&step_calls);
        let step: Arc<dyn Processor> = Arc::new(processor_fn(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        let executor = AdviceChainExecutor::new("ex", Some(step), &EngineContext::default())
            .with_advice(Recording::new("a", &log))
            .with_advice(Recording::new("b", &log).failing_before())
            .with_advice(Recording::new("c", &log));

        let exchange = Exchange::new();
        let (done, count, flag) = counting_done();
        assert!(executor.process(&exchange, done));

        assert_eq!(entries(&log), vec!["before:a", "before:b"]);
        assert_eq!(step_calls.load(Ordering::SeqCst), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(*flag.lock(), Some(true));
        assert_eq!(exchange.error().unwrap().to_string(), "b before failed");
    }

    #[test]
    fn unwind_policy_runs_after_for_succeeded_befores() {
        let log = log();
        let config = EngineConfig {
            before_failure_policy: BeforeFailurePolicy::Unwind,
            ..EngineConfig::default()
        };
        let ctx = EngineContext::new(
            config,
            Arc::new(crate::shutdown::ShutdownController::new()),
            Arc::new(TrampolineScheduler::new()),
        );
        let executor = AdviceChainExecutor::new("ex", Some(ok_step()), &ctx)
            .with_advice(Recording::new("a", &log).failing_after())
            .with_advice(Recording::new("b", &log))
            .with_advice(Recording::new("c", &log).failing_before())
            .with_advice(Recording::new("d", &log));

        let exchange = Exchange::new();
        let (done, count, _) = counting_done();
        assert!(executor.process(&exchange, done));

        assert_eq!(
            entries(&log),
            vec!["before:a", "before:b", "before:c", "after:b", "after:a"]
        );
        assert_eq!(count.load(Ordering::SeqCst), 1);
        // The before failure wins over failures raised while unwinding.
        assert_eq!(exchange.error().unwrap().to_string(), "c before failed");
    }

    #[test]
    fn panicking_before_is_recorded_as_error() {
        struct Panics;

        impl Advice for Panics {
            type State = ();

            fn name(&self) -> &'static str {
                "panics"
            }

            fn before(&self, _exchange: &Exchange) -> anyhow::Result<()> {
                panic!("advice bug");
            }

            fn after(&self, _exchange: &Exchange, (): ()) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let executor = AdviceChainExecutor::new("ex", Some(ok_step()), &EngineContext::default())
            .with_advice(Panics);
        let exchange = Exchange::new();
        let (done, count, _) = counting_done();
        assert!(executor.process(&exchange, done));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        let err = exchange.error().unwrap();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::Panicked { message, .. }) if message == "advice bug"
        ));
    }

    // -- after failures -----------------------------------------------------

    #[test]
    fn after_failures_are_isolated_and_last_wins() {
        let log = log();
        let executor = AdviceChainExecutor::new("ex", Some(ok_step()), &EngineContext::default())
            .with_advice(Recording::new("a", &log).failing_after())
            .with_advice(Recording::new("b", &log))
            .with_advice(Recording::new("c", &log).failing_after());

        let exchange = Exchange::new();
        let (done, count, _) = counting_done();
        executor.process(&exchange, done);

        assert_eq!(
            entries(&log),
            vec!["before:a", "before:b", "before:c", "after:c", "after:b", "after:a"]
        );
        assert_eq!(count.load(Ordering::SeqCst), 1);
        // "a" runs last in the after phase.
        assert_eq!(exchange.error().unwrap().to_string(), "a after failed");
    }

    // -- dispatch -----------------------------------------------------------

    #[test]
    fn transacted_step_error_lands_on_exchange_and_after_runs() {
        let log = log();
        let step: Arc<dyn Processor> = Arc::new(processor_fn(|_| anyhow::bail!("step failed")));
        let scheduler = Arc::new(CountingScheduler::default());
        let ctx = EngineContext::default().with_scheduler(Arc::clone(&scheduler) as Arc<dyn Scheduler>);
        let executor = AdviceChainExecutor::new("ex", Some(step), &ctx)
            .with_advice(Recording::new("a", &log))
            .with_advice(Recording::new("b", &log));

        let exchange = Exchange::new();
        exchange.set_transacted(true);
        let (done, count, flag) = counting_done();
        assert!(executor.process(&exchange, done));

        assert_eq!(
            entries(&log),
            vec!["before:a", "before:b", "after:b", "after:a"]
        );
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(*flag.lock(), Some(true));
        assert_eq!(exchange.error().unwrap().to_string(), "step failed");
        // The inline path schedules nothing.
        assert!(scheduler.labels.lock().is_empty());
    }

    #[test]
    fn transacted_step_panic_is_captured() {
        let step: Arc<dyn Processor> = Arc::new(processor_fn(|_| panic!("step bug")));
        let executor = AdviceChainExecutor::new("ex", Some(step), &EngineContext::default());

        let exchange = Exchange::new();
        exchange.set_transacted(true);
        let (done, count, _) = counting_done();
        assert!(executor.process(&exchange, done));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(matches!(
            exchange.error().unwrap().downcast_ref::<EngineError>(),
            Some(EngineError::Panicked { .. })
        ));
    }

    #[test]
    fn async_path_schedules_after_process_task() {
        let scheduler = Arc::new(CountingScheduler::default());
        let ctx = EngineContext::default().with_scheduler(Arc::clone(&scheduler) as Arc<dyn Scheduler>);
        let executor = AdviceChainExecutor::new("route-1/log", Some(ok_step()), &ctx);

        let exchange = Exchange::with_id("ex-1", &switchyard_core::clock::SystemClock);
        let (done, count, flag) = counting_done();
        assert!(!executor.process(&exchange, done));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        // The step completed synchronously.
        assert_eq!(*flag.lock(), Some(true));
        assert_eq!(
            *scheduler.labels.lock(),
            vec!["route-1/log - unit of work after process - ex-1".to_string()]
        );
    }

    #[test]
    fn async_completion_runs_after_on_completing_thread() {
        /// Parks the continuation for the test to complete elsewhere.
        #[derive(Default)]
        struct Parked {
            slot: Mutex<Option<Continuation>>,
        }

        impl Processor for Parked {
            fn process(&self, _exchange: &Exchange, done: Continuation) -> bool {
                *self.slot.lock() = Some(done);
                false
            }
        }

        let log = log();
        let threads = Arc::new(Mutex::new(Vec::new()));
        let mut a = Recording::new("a", &log);
        a.after_threads = Some(Arc::clone(&threads));
        let mut b = Recording::new("b", &log);
        b.after_threads = Some(Arc::clone(&threads));
        let step = Arc::new(Parked::default());
        let executor = AdviceChainExecutor::new(
            "ex",
            Some(Arc::clone(&step) as Arc<dyn Processor>),
            &EngineContext::default(),
        )
        .with_advice(a)
        .with_advice(b);

        let (done, count, flag) = counting_done();
        assert!(!executor.process(&Exchange::new(), done));
        // Nothing after `before` ran on the calling thread.
        assert_eq!(entries(&log), vec!["before:a", "before:b"]);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        let parked = step.slot.lock().take().unwrap();
        let completer = thread::spawn(move || {
            parked.complete(false);
            thread::current().id()
        });
        let completed_on = completer.join().unwrap();

        assert_ne!(completed_on, thread::current().id());
        assert_eq!(
            entries(&log),
            vec!["before:a", "before:b", "after:b", "after:a"]
        );
        assert_eq!(*threads.lock(), vec![completed_on, completed_on]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(*flag.lock(), Some(false));
    }

    // -- composition --------------------------------------------------------

    #[test]
    fn executors_nest() {
        let log = log();
        let inner = AdviceChainExecutor::new("inner", Some(ok_step()), &EngineContext::default())
            .with_advice(Recording::new("inner", &log));
        let outer = AdviceChainExecutor::new(
            "outer",
            Some(Arc::new(inner)),
            &EngineContext::default(),
        )
        .with_advice(Recording::new("outer", &log));

        let (done, count, _) = counting_done();
        outer.process(&Exchange::new(), done);

        assert_eq!(
            entries(&log),
            vec!["before:outer", "before:inner", "after:inner", "after:outer"]
        );
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn chain_is_shared_across_invocations() {
        let log = log();
        let executor = AdviceChainExecutor::new("ex", Some(ok_step()), &EngineContext::default())
            .with_advice(Recording::new("a", &log));
        for _ in 0..3 {
            executor.process(&Exchange::new(), Continuation::noop());
        }
        assert_eq!(log.lock().len(), 6);
        assert_eq!(executor.chain().names(), vec!["a"]);
    }
}

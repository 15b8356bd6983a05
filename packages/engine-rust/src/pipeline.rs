//! Sequential composition of routing steps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use switchyard_core::exchange::properties;
use switchyard_core::{Continuation, Exchange, Processor};

use crate::context::EngineContext;
use crate::scheduler::Scheduler;

/// Runs its steps one after another on the same exchange.
///
/// Every step is started from a task posted to the scheduler, never from the
/// previous step's completion call. With the [`TrampolineScheduler`] a
/// pipeline of any length therefore runs in constant stack depth, whether its
/// steps complete synchronously or not.
///
/// The pipeline stops early once the exchange carries an error or is marked to
/// stop routing.
///
/// [`TrampolineScheduler`]: crate::scheduler::TrampolineScheduler
pub struct Pipeline {
    name: String,
    steps: Arc<[Arc<dyn Processor>]>,
    scheduler: Arc<dyn Scheduler>,
}

impl Pipeline {
    #[must_use]
    pub fn new(name: impl Into<String>, steps: Vec<Arc<dyn Processor>>, ctx: &EngineContext) -> Self {
        Self {
            name: name.into(),
            steps: steps.into(),
            scheduler: Arc::clone(&ctx.scheduler),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// State of one exchange travelling through a pipeline.
struct Run {
    name: String,
    steps: Arc<[Arc<dyn Processor>]>,
    scheduler: Arc<dyn Scheduler>,
    exchange: Exchange,
    caller: ThreadId,
    returned: AtomicBool,
    completed_sync: AtomicBool,
}

impl Run {
    fn schedule(self: Arc<Self>, index: usize, done: Continuation) {
        let label = format!("{} - step {} - {}", self.name, index, self.exchange.id());
        let scheduler = Arc::clone(&self.scheduler);
        scheduler.schedule(Box::new(move || self.step(index, done)), &label);
    }

    fn step(self: Arc<Self>, index: usize, done: Continuation) {
        let Some(processor) = self.steps.get(index).cloned() else {
            self.finish(done);
            return;
        };
        if !continue_routing(&self.exchange, index) {
            self.finish(done);
            return;
        }

        let exchange = self.exchange.clone();
        let next = Arc::clone(&self);
        processor.process(
            &exchange,
            Continuation::new(move |_| next.schedule(index + 1, done)),
        );
    }

    fn finish(&self, done: Continuation) {
        // Only a completion on the calling thread before `process` returned
        // counts as synchronous.
        let sync = thread::current().id() == self.caller && !self.returned.load(Ordering::Acquire);
        if sync {
            self.completed_sync.store(true, Ordering::Release);
        }
        done.complete(sync);
    }
}

fn continue_routing(exchange: &Exchange, index: usize) -> bool {
    if index == 0 {
        return true;
    }
    if exchange.has_error() {
        tracing::debug!(exchange_id = %exchange.id(), "exchange failed, stopping pipeline");
        return false;
    }
    let stop = exchange
        .property(properties::ROUTE_STOP)
        .and_then(|v| v.coerce_bool())
        .unwrap_or(false);
    if stop {
        tracing::debug!(exchange_id = %exchange.id(), "exchange marked to stop routing, stopping pipeline");
    }
    !stop
}

impl Processor for Pipeline {
    fn process(&self, exchange: &Exchange, done: Continuation) -> bool {
        let run = Arc::new(Run {
            name: self.name.clone(),
            steps: Arc::clone(&self.steps),
            scheduler: Arc::clone(&self.scheduler),
            exchange: exchange.clone(),
            caller: thread::current().id(),
            returned: AtomicBool::new(false),
            completed_sync: AtomicBool::new(false),
        });
        Arc::clone(&run).schedule(0, done);
        run.returned.store(true, Ordering::Release);
        run.completed_sync.load(Ordering::Acquire)
    }

    /// Runs every step inline, without the scheduler.
    ///
    /// Called from an inline dispatch, possibly while the calling thread is
    /// draining its trampoline queue; scheduling from here could wait on a
    /// task only this thread can run.
    fn process_sync(&self, exchange: &Exchange) -> anyhow::Result<()> {
        for (index, step) in self.steps.iter().enumerate() {
            if !continue_routing(exchange, index) {
                break;
            }
            step.process_sync(exchange)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("steps", &self.steps.len())
            .finish_non_exhaustive()
    }
}

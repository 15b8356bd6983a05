//! Thread-local trampoline scheduler.
//!
//! A task scheduled while the current thread is already draining its queue is
//! appended and run by the outer drain loop once the running task returns.
//! Chains of completions that each schedule the next step therefore run in
//! constant stack depth.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};

use super::{panic_message, Scheduler, Task};

thread_local! {
    static QUEUE: RefCell<VecDeque<(Task, String)>> = RefCell::new(VecDeque::new());
    static DRAINING: Cell<bool> = const { Cell::new(false) };
}

/// Runs tasks on the scheduling thread, flattening nested schedules into a
/// queue.
///
/// The first `schedule` call on a thread runs the task before returning.
/// Nested calls only enqueue.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrampolineScheduler;

impl TrampolineScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Clears the draining flag even if a task unwinds past the drain loop.
struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        DRAINING.with(|d| d.set(false));
    }
}

impl Scheduler for TrampolineScheduler {
    fn schedule(&self, task: Task, label: &str) {
        QUEUE.with(|q| q.borrow_mut().push_back((task, label.to_string())));

        if DRAINING.with(Cell::get) {
            return;
        }
        DRAINING.with(|d| d.set(true));
        let _guard = DrainGuard;

        while let Some((task, label)) = QUEUE.with(|q| q.borrow_mut().pop_front()) {
            let span = tracing::trace_span!("scheduled_task", task = %label);
            let outcome = span.in_scope(|| {
                tracing::trace!("running scheduled task");
                catch_unwind(AssertUnwindSafe(task))
            });
            if let Err(payload) = outcome {
                tracing::error!(
                    task = %label,
                    panic = %panic_message(payload.as_ref()),
                    "scheduled task panicked"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn first_schedule_runs_before_returning() {
        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        TrampolineScheduler::new().schedule(
            Box::new(move || {
                r.fetch_add(1, Ordering::SeqCst);
            }),
            "t",
        );
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nested_schedule_runs_after_current_task() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let o = Arc::clone(&order);
        TrampolineScheduler.schedule(
            Box::new(move || {
                let inner = Arc::clone(&o);
                TrampolineScheduler.schedule(
                    Box::new(move || inner.lock().unwrap().push("inner")),
                    "inner",
                );
                o.lock().unwrap().push("outer");
            }),
            "outer",
        );
        assert_eq!(*order.lock().unwrap(), vec!["outer", "inner"]);
    }

    #[test]
    fn deep_chain_does_not_grow_stack() {
        fn step(remaining: usize, count: Arc<AtomicUsize>) {
            count.fetch_add(1, Ordering::SeqCst);
            if remaining > 0 {
                TrampolineScheduler.schedule(Box::new(move || step(remaining - 1, count)), "step");
            }
        }

        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        std::thread::Builder::new()
            .stack_size(128 * 1024)
            .spawn(move || {
                TrampolineScheduler.schedule(Box::new(move || step(50_000, c)), "root");
            })
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 50_001);
    }

    #[test]
    fn panicking_task_does_not_stop_drain() {
        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        TrampolineScheduler.schedule(
            Box::new(move || {
                let r2 = Arc::clone(&r);
                TrampolineScheduler.schedule(
                    Box::new(move || {
                        r2.fetch_add(1, Ordering::SeqCst);
                    }),
                    "after-panic",
                );
                panic!("task failure");
            }),
            "panics",
        );
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(!DRAINING.with(Cell::get));
    }
}

//! Task scheduling for post-dispatch work.
//!
//! The executor never runs the "after" half of an exchange directly on the
//! processor's completion call stack. It hands that work to a [`Scheduler`],
//! which decides where and when it runs.

pub mod trampoline;
pub mod worker;

pub use trampoline::TrampolineScheduler;
pub use worker::{BackgroundRunnable, BackgroundWorker, WorkerScheduler};

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Accepts deferred work for later execution.
///
/// Implementations must run every scheduled task exactly once. The `label`
/// describes the task for diagnostics only.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, task: Task, label: &str);
}

/// Renders a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

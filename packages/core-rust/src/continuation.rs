//! One-shot completion signal passed to processors.

use std::fmt;

type Callback = Box<dyn FnOnce(bool) + Send + 'static>;

/// One-shot completion signal handed to a [`Processor`](crate::Processor).
///
/// The `bool` passed to [`complete`](Self::complete) reports whether the
/// processor finished on the calling execution context (`true`) or later on
/// another one (`false`).
///
/// `complete` consumes the continuation, so a second invocation cannot be
/// expressed. Dropping a continuation without completing it breaks the
/// exactly-once contract; it is logged at error level.
pub struct Continuation {
    callback: Option<Callback>,
}

impl Continuation {
    /// Wraps a callback.
    #[must_use]
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(bool) + Send + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    /// A continuation that does nothing when completed.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    /// Signals completion.
    pub fn complete(mut self, done_sync: bool) {
        if let Some(callback) = self.callback.take() {
            callback(done_sync);
        }
    }

    /// Decorates this continuation: `wrapper` receives the completion flag and
    /// the wrapped continuation, and is responsible for completing it.
    #[must_use]
    pub fn wrap<F>(self, wrapper: F) -> Self
    where
        F: FnOnce(bool, Continuation) + Send + 'static,
    {
        Self::new(move |done_sync| wrapper(done_sync, self))
    }
}

impl Drop for Continuation {
    fn drop(&mut self) {
        if self.callback.is_some() && !std::thread::panicking() {
            tracing::error!("continuation dropped without being completed");
        }
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("pending", &self.callback.is_some())
            .finish()
    }
}

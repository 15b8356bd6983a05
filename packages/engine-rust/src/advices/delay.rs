//! Fixed delay before a step, interruptible on shutdown.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use switchyard_core::Exchange;

use crate::advice::Advice;
use crate::error::EngineError;

/// Wakes every delayed step early; they fail with
/// [`EngineError::Interrupted`].
#[derive(Debug, Default)]
pub struct DelayCancel {
    cancelled: Mutex<bool>,
    cv: Condvar,
}

impl DelayCancel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        *self.cancelled.lock() = true;
        self.cv.notify_all();
    }

    /// Re-arms after a cancellation.
    pub fn reset(&self) {
        *self.cancelled.lock() = false;
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock()
    }

    /// Waits for `delay` unless cancelled first. Returns `false` if cancelled.
    fn sleep(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        let mut cancelled = self.cancelled.lock();
        while !*cancelled {
            if self.cv.wait_until(&mut cancelled, deadline).timed_out() {
                return !*cancelled;
            }
        }
        false
    }
}

/// Blocks the calling thread for a fixed duration before the step.
pub struct DelayAdvice {
    delay: Duration,
    cancel: Arc<DelayCancel>,
}

impl DelayAdvice {
    #[must_use]
    pub fn new(delay: Duration, cancel: Arc<DelayCancel>) -> Self {
        Self { delay, cancel }
    }
}

impl Advice for DelayAdvice {
    type State = ();

    fn name(&self) -> &'static str {
        "delay"
    }

    fn before(&self, exchange: &Exchange) -> anyhow::Result<()> {
        tracing::trace!(delay_ms = self.delay.as_millis(), "sleeping");
        if self.cancel.sleep(self.delay) {
            Ok(())
        } else {
            tracing::debug!(exchange_id = %exchange.id(), "sleep interrupted");
            Err(EngineError::Interrupted {
                what: "delay",
                exchange_id: exchange.id().to_string(),
            }
            .into())
        }
    }

    fn after(&self, _exchange: &Exchange, (): ()) -> anyhow::Result<()> {
        Ok(())
    }
}

//! The advice capability: before/after hooks wrapped around a routing step.
//!
//! - [`Advice`]: the typed capability concerns implement
//! - [`ErasedAdvice`]: object-safe form stored in an [`AdviceChain`]
//! - [`AdviceChain`]: priority-sorted, stable, append-only sequence
//! - [`AdviceStates`]: per-invocation arena of `before` results
//! - [`Instrumented`]: decorator adding trace-level timing to any advice

pub mod chain;
pub mod state;

use std::any::Any;
use std::time::Instant;

use switchyard_core::Exchange;

use crate::error::EngineError;

pub use chain::AdviceChain;
pub use state::{AdviceState, AdviceStates};

/// Runs first in the before phase (and last in the after phase).
pub const HIGHEST: i32 = i32::MIN;
/// Runs last in the before phase, immediately before dispatch.
pub const LOWEST: i32 = i32::MAX;
/// Priority of advices that do not declare one.
pub const DEFAULT_PRIORITY: i32 = 0;

/// A cross-cutting concern applied around a routing step.
///
/// `before` runs ahead of the step and returns a state value that is handed
/// back to `after` once the step has completed. Advices with a lower
/// [`priority`](Self::priority) run earlier in the before phase and later in
/// the after phase.
pub trait Advice: Send + Sync + 'static {
    /// State carried from `before` to `after`.
    type State: Send + 'static;

    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Called before the step runs.
    ///
    /// # Errors
    ///
    /// An error aborts the chain: remaining `before` calls are skipped and the
    /// error is recorded on the exchange.
    fn before(&self, exchange: &Exchange) -> anyhow::Result<Self::State>;

    /// Called after the step has completed.
    ///
    /// # Errors
    ///
    /// An error is recorded on the exchange; remaining `after` calls still run.
    fn after(&self, exchange: &Exchange, state: Self::State) -> anyhow::Result<()>;

    /// Ordering priority. `None` means [`DEFAULT_PRIORITY`].
    fn priority(&self) -> Option<i32> {
        None
    }

    /// The advice that lookups should match. Decorators return their inner advice.
    fn unwrap_advice(&self) -> &dyn Any
    where
        Self: Sized,
    {
        self
    }
}

/// Object-safe form of [`Advice`], with the state type erased.
///
/// Implemented for every `Advice`; chains hold `Arc<dyn ErasedAdvice>`.
pub trait ErasedAdvice: Send + Sync {
    fn name(&self) -> &'static str;

    /// Effective priority, with the default applied.
    fn priority(&self) -> i32;

    /// # Errors
    ///
    /// Propagates the advice's `before` error.
    fn before_erased(&self, exchange: &Exchange) -> anyhow::Result<AdviceState>;

    /// # Errors
    ///
    /// Propagates the advice's `after` error, or [`EngineError::StateMismatch`]
    /// if `state` did not come from this advice's `before`.
    fn after_erased(&self, exchange: &Exchange, state: AdviceState) -> anyhow::Result<()>;

    /// Target for type-based lookup, with decorator layers unwrapped.
    fn as_any(&self) -> &dyn Any;
}

impl<A: Advice> ErasedAdvice for A {
    fn name(&self) -> &'static str {
        Advice::name(self)
    }

    fn priority(&self) -> i32 {
        Advice::priority(self).unwrap_or(DEFAULT_PRIORITY)
    }

    fn before_erased(&self, exchange: &Exchange) -> anyhow::Result<AdviceState> {
        let state = self.before(exchange)?;
        Ok(Box::new(state))
    }

    fn after_erased(&self, exchange: &Exchange, state: AdviceState) -> anyhow::Result<()> {
        let state = state
            .downcast::<A::State>()
            .map_err(|_| EngineError::StateMismatch {
                advice: Advice::name(self),
            })?;
        self.after(exchange, *state)
    }

    fn as_any(&self) -> &dyn Any {
        self.unwrap_advice()
    }
}

// ---------------------------------------------------------------------------
// Instrumented
// ---------------------------------------------------------------------------

/// Decorator that logs the time spent in each phase of the wrapped advice.
///
/// Transparent to [`AdviceChain::get`]: looking up `A` finds the inner advice.
#[derive(Debug)]
pub struct Instrumented<A> {
    inner: A,
}

impl<A: Advice> Instrumented<A> {
    #[must_use]
    pub fn new(inner: A) -> Self {
        Self { inner }
    }

    #[must_use]
    pub fn inner(&self) -> &A {
        &self.inner
    }
}

impl<A: Advice> Advice for Instrumented<A> {
    type State = (A::State, Instant);

    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn before(&self, exchange: &Exchange) -> anyhow::Result<Self::State> {
        let started = Instant::now();
        let state = self.inner.before(exchange)?;
        tracing::trace!(
            advice = self.inner.name(),
            exchange_id = exchange.id(),
            elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
            "advice before"
        );
        Ok((state, Instant::now()))
    }

    fn after(&self, exchange: &Exchange, (state, dispatched): Self::State) -> anyhow::Result<()> {
        let started = Instant::now();
        let result = self.inner.after(exchange, state);
        tracing::trace!(
            advice = self.inner.name(),
            exchange_id = exchange.id(),
            since_dispatch_us = u64::try_from(dispatched.elapsed().as_micros()).unwrap_or(u64::MAX),
            elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
            ok = result.is_ok(),
            "advice after"
        );
        result
    }

    fn priority(&self) -> Option<i32> {
        self.inner.priority()
    }

    fn unwrap_advice(&self) -> &dyn Any {
        self.inner.unwrap_advice()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

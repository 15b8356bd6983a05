//! Pre-flight decision consulted before an executor does any work.

use switchyard_core::exchange::properties;
use switchyard_core::Exchange;

use crate::error::EngineError;
use crate::executor::ExecutorId;
use crate::shutdown::ShutdownStrategy;

/// Outcome of [`check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Continue,
    Reject,
}

/// Decides whether `executor` may run `exchange`.
///
/// A truthy [`properties::ROUTE_STOP`] rejects without recording an error.
/// A forced shutdown rejects and records [`EngineError::RejectedExecution`]
/// unless the exchange already carries an error.
pub fn check(
    exchange: &Exchange,
    executor: &ExecutorId,
    shutdown: &dyn ShutdownStrategy,
) -> GateDecision {
    let stop = exchange
        .property(properties::ROUTE_STOP)
        .and_then(|v| v.coerce_bool())
        .unwrap_or(false);
    if stop {
        tracing::debug!(
            exchange_id = %exchange.id(),
            executor = %executor,
            "exchange is marked to stop routing"
        );
        return GateDecision::Reject;
    }

    if shutdown.force_shutdown(executor) {
        let recorded = exchange.set_error_if_absent(
            EngineError::RejectedExecution {
                executor: executor.to_string(),
                exchange_id: exchange.id().to_string(),
            }
            .into(),
        );
        tracing::debug!(
            exchange_id = %exchange.id(),
            executor = %executor,
            recorded,
            "rejecting exchange, forced shutdown in progress"
        );
        return GateDecision::Reject;
    }

    GateDecision::Continue
}

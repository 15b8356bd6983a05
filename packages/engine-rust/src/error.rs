//! Errors originated by the engine itself.
//!
//! Engine errors are recorded on the exchange boxed in an `anyhow::Error`, so
//! callers inspecting a finished exchange can `downcast_ref::<EngineError>()`.

/// Failures raised by the engine and its default collaborators.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(
        "run not allowed as shutdown strategy is forcing shutdown, rejecting exchange {exchange_id} on {executor}"
    )]
    RejectedExecution {
        executor: String,
        exchange_id: String,
    },
    #[error("{what} interrupted for exchange {exchange_id}")]
    Interrupted {
        what: &'static str,
        exchange_id: String,
    },
    #[error("advice {advice} received state of an unexpected type")]
    StateMismatch { advice: &'static str },
    #[error("{what} panicked: {message}")]
    Panicked { what: String, message: String },
    #[error("exchange {exchange_id} has no unit of work")]
    MissingUnitOfWork { exchange_id: String },
    #[error("stream of {size} bytes exceeds the in-memory cache limit of {limit} bytes")]
    StreamTooLarge { size: usize, limit: usize },
    #[error("completion dropped before it fired for exchange {exchange_id}")]
    CompletionDropped { exchange_id: String },
    #[error("stream caching failed: {0}")]
    Io(#[from] std::io::Error),
}

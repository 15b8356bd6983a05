//! Tower adapter: drive a routing step as a `tower::Service`.
//!
//! The returned future resolves once the step's completion fires, from
//! whichever thread fires it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use switchyard_core::{Continuation, Exchange, Processor};
use tokio::sync::oneshot;
use tower::Service;

use crate::error::EngineError;

// ---------------------------------------------------------------------------
// ExecutorService
// ---------------------------------------------------------------------------

/// `tower::Service` over any [`Processor`], typically an
/// [`AdviceChainExecutor`](crate::executor::AdviceChainExecutor) or a
/// [`Pipeline`](crate::pipeline::Pipeline).
///
/// Responds with the exchange itself; routing failures stay on the exchange.
/// The only service-level error is a step that dropped its continuation.
#[derive(Clone)]
pub struct ExecutorService {
    processor: Arc<dyn Processor>,
}

impl ExecutorService {
    #[must_use]
    pub fn new(processor: Arc<dyn Processor>) -> Self {
        Self { processor }
    }
}

impl Service<Exchange> for ExecutorService {
    type Response = Exchange;
    type Error = EngineError;
    type Future = Pin<Box<dyn Future<Output = Result<Exchange, EngineError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, exchange: Exchange) -> Self::Future {
        let (tx, rx) = oneshot::channel::<bool>();
        self.processor.process(
            &exchange,
            Continuation::new(move |done_sync| {
                let _ = tx.send(done_sync);
            }),
        );
        Box::pin(async move {
            match rx.await {
                Ok(_) => Ok(exchange),
                Err(_) => Err(EngineError::CompletionDropped {
                    exchange_id: exchange.id().to_string(),
                }),
            }
        })
    }
}

impl std::fmt::Debug for ExecutorService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorService").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

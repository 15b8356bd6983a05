use std::sync::mpsc;

use crate::continuation::Continuation;
use crate::exchange::Exchange;

/// A routing step: processes an exchange and signals completion.
///
/// [`process`](Self::process) must complete `done` exactly once. It returns
/// `true` if it already did so before returning (synchronous completion) and
/// `false` if it will do so later, from any thread (asynchronous completion).
/// Failures are recorded on the exchange, not returned.
pub trait Processor: Send + Sync {
    /// Processes `exchange`, completing `done` now or later.
    fn process(&self, exchange: &Exchange, done: Continuation) -> bool;

    /// Processes `exchange` on the calling thread, blocking until done.
    ///
    /// The default bridges through [`process`](Self::process) and waits for
    /// the continuation. Steps that are naturally synchronous override this.
    ///
    /// # Errors
    ///
    /// Returns an error if the step fails outright, or if it dropped its
    /// continuation without completing it.
    fn process_sync(&self, exchange: &Exchange) -> anyhow::Result<()> {
        let (tx, rx) = mpsc::sync_channel::<()>(1);
        let completed_inline = self.process(
            exchange,
            Continuation::new(move |_| {
                let _ = tx.send(());
            }),
        );
        if !completed_inline {
            rx.recv()
                .map_err(|_| anyhow::anyhow!("processor dropped its continuation without completing"))?;
        }
        Ok(())
    }
}

/// Adapter turning a synchronous closure into a [`Processor`].
///
/// Built by [`processor_fn`].
pub struct FnProcessor<F> {
    f: F,
}

/// Wraps `f` as a processor that always completes synchronously, recording
/// any returned error on the exchange.
pub fn processor_fn<F>(f: F) -> FnProcessor<F>
where
    F: Fn(&Exchange) -> anyhow::Result<()> + Send + Sync,
{
    FnProcessor { f }
}

impl<F> Processor for FnProcessor<F>
where
    F: Fn(&Exchange) -> anyhow::Result<()> + Send + Sync,
{
    fn process(&self, exchange: &Exchange, done: Continuation) -> bool {
        if let Err(err) = (self.f)(exchange) {
            exchange.set_error(err);
        }
        done.complete(true);
        true
    }

    fn process_sync(&self, exchange: &Exchange) -> anyhow::Result<()> {
        (self.f)(exchange)
    }
}

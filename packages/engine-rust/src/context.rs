//! Shared collaborators handed to every executor at construction.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::scheduler::{Scheduler, TrampolineScheduler};
use crate::shutdown::{ShutdownController, ShutdownStrategy};

/// Injected dependencies for executors and advices.
///
/// Cloning is cheap; every field is reference-counted.
#[derive(Clone)]
pub struct EngineContext {
    pub config: Arc<EngineConfig>,
    pub shutdown: Arc<dyn ShutdownStrategy>,
    pub scheduler: Arc<dyn Scheduler>,
}

impl EngineContext {
    #[must_use]
    pub fn new(
        config: EngineConfig,
        shutdown: Arc<dyn ShutdownStrategy>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            shutdown,
            scheduler,
        }
    }

    /// Returns a copy of this context using `scheduler`.
    #[must_use]
    pub fn with_scheduler(&self, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            scheduler,
            ..self.clone()
        }
    }
}

impl Default for EngineContext {
    /// Default configuration, a fresh [`ShutdownController`] and the
    /// [`TrampolineScheduler`].
    fn default() -> Self {
        Self::new(
            EngineConfig::default(),
            Arc::new(ShutdownController::new()),
            Arc::new(TrampolineScheduler::new()),
        )
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

//! Switchyard Engine: advice chains, dispatch and continuation scheduling
//! around routing steps.

pub mod advice;
pub mod advices;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod gate;
pub mod pipeline;
pub mod scheduler;
pub mod service;
pub mod shutdown;
pub mod unit_of_work;

pub use advice::{Advice, AdviceChain, ErasedAdvice, Instrumented};
pub use config::{BeforeFailurePolicy, EngineConfig};
pub use context::EngineContext;
pub use error::EngineError;
pub use executor::{AdviceChainExecutor, ExecutorId};
pub use pipeline::Pipeline;
pub use scheduler::{Scheduler, TrampolineScheduler, WorkerScheduler};
pub use service::ExecutorService;
pub use shutdown::{LifecycleState, LifecycleStatus, ShutdownController, ShutdownStrategy};
pub use unit_of_work::{DefaultUnitOfWork, DefaultUnitOfWorkFactory, UnitOfWorkFactory};

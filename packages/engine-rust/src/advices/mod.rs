//! Concrete advices for the cross-cutting concerns of a routing step.
//!
//! Each advice is independent; which ones wrap a step is decided by whoever
//! assembles the route.

pub mod debugger;
pub mod delay;
pub mod history;
pub mod inflight;
pub mod lifecycle;
pub mod policy;
pub mod stream_cache;
pub mod tracer;
pub mod unit_of_work;

pub use debugger::{BacklogDebugger, DebuggerAdvice, DebuggerEvent};
pub use delay::{DelayAdvice, DelayCancel};
pub use history::{DefaultMessageHistoryFactory, MessageHistoryAdvice, MessageHistoryFactory};
pub use inflight::{DefaultInflightRepository, InflightAdvice, InflightExchange, InflightRepository};
pub use lifecycle::RouteLifecycleAdvice;
pub use policy::{RoutePolicy, RoutePolicyAdvice};
pub use stream_cache::{
    CachedBytes, DefaultStreamCachingStrategy, StreamCachingAdvice, StreamCachingStrategy,
};
pub use tracer::{BacklogTracer, TraceEvent, TracerAdvice};
pub use unit_of_work::{SubUnitOfWorkAdvice, UnitOfWorkAdvice, UnitOfWorkSource};

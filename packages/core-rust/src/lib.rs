//! Switchyard Core: the exchange data model and the capability contracts
//! routing steps, units of work and advices are written against.

pub mod clock;
pub mod continuation;
pub mod exchange;
pub mod history;
pub mod message;
pub mod route;
pub mod traits;
pub mod types;
pub mod unit_of_work;

pub use clock::{ClockSource, ManualClock, SystemClock};
pub use continuation::Continuation;
pub use exchange::{properties, Exchange};
pub use history::MessageHistory;
pub use message::{Body, InputStream, Message, StreamCache};
pub use route::{NodeDefinition, RouteContext};
pub use traits::{processor_fn, FnProcessor, Processor};
pub use types::Value;
pub use unit_of_work::{Synchronization, UnitOfWork};

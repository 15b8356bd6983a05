//! The per-message context threaded through every routing step.
//!
//! An [`Exchange`] is a cheaply cloneable handle: clones share the same state.
//! All mutable state sits behind one short-held lock that is never held while
//! calling out to collaborators (units of work, strategies, advices).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::{ClockSource, SystemClock};
use crate::history::MessageHistory;
use crate::message::{Body, Message};
use crate::types::Value;
use crate::unit_of_work::UnitOfWork;

/// Well-known exchange property names.
pub mod properties {
    /// When set to a truthy value, routing stops before the next step.
    pub const ROUTE_STOP: &str = "SwitchyardRouteStop";
    /// Creation time of the exchange, epoch millis.
    pub const CREATED_TIMESTAMP: &str = "SwitchyardCreatedTimestamp";
}

/// Mutable state of an exchange, guarded by the exchange lock.
#[derive(Default)]
struct ExchangeState {
    properties: BTreeMap<String, Value>,
    in_message: Message,
    out_message: Option<Message>,
    error: Option<Arc<anyhow::Error>>,
    unit_of_work: Option<Arc<dyn UnitOfWork>>,
    from_route_id: Option<String>,
    history: Option<Vec<Arc<MessageHistory>>>,
}

struct ExchangeInner {
    id: String,
    created_ms: u64,
    transacted: AtomicBool,
    state: Mutex<ExchangeState>,
}

/// Mutable, reference-shared context for one message traversal.
#[derive(Clone)]
pub struct Exchange {
    inner: Arc<ExchangeInner>,
}

impl Exchange {
    /// Creates an exchange with a random UUID v4 id, stamped by the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), &SystemClock)
    }

    /// Creates an exchange with an explicit id, stamped by `clock`.
    #[must_use]
    pub fn with_id(id: impl Into<String>, clock: &dyn ClockSource) -> Self {
        let created_ms = clock.now();
        let mut state = ExchangeState::default();
        #[allow(clippy::cast_possible_wrap)]
        state.properties.insert(
            properties::CREATED_TIMESTAMP.to_string(),
            Value::Int(created_ms as i64),
        );
        Self {
            inner: Arc::new(ExchangeInner {
                id: id.into(),
                created_ms,
                transacted: AtomicBool::new(false),
                state: Mutex::new(state),
            }),
        }
    }

    /// Creates an exchange carrying `body` as its in-message body.
    #[must_use]
    pub fn with_body(body: impl Into<Body>) -> Self {
        let exchange = Self::new();
        exchange.set_in_body(body);
        exchange
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Creation time, epoch millis.
    #[must_use]
    pub fn created_ms(&self) -> u64 {
        self.inner.created_ms
    }

    /// Whether two handles refer to the same exchange.
    #[must_use]
    pub fn ptr_eq(&self, other: &Exchange) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // -- transacted ---------------------------------------------------------

    /// Transacted exchanges must be routed synchronously on the calling context.
    #[must_use]
    pub fn is_transacted(&self) -> bool {
        self.inner.transacted.load(Ordering::Acquire)
    }

    pub fn set_transacted(&self, transacted: bool) {
        self.inner.transacted.store(transacted, Ordering::Release);
    }

    // -- properties ---------------------------------------------------------

    #[must_use]
    pub fn property(&self, name: &str) -> Option<Value> {
        self.inner.state.lock().properties.get(name).cloned()
    }

    pub fn set_property(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.inner
            .state
            .lock()
            .properties
            .insert(name.into(), value.into());
    }

    pub fn remove_property(&self, name: &str) -> Option<Value> {
        self.inner.state.lock().properties.remove(name)
    }

    /// Marks the exchange so routing stops before the next step.
    pub fn stop_routing(&self) {
        self.set_property(properties::ROUTE_STOP, true);
    }

    // -- error slot ---------------------------------------------------------

    /// The outstanding failure, if any.
    #[must_use]
    pub fn error(&self) -> Option<Arc<anyhow::Error>> {
        self.inner.state.lock().error.clone()
    }

    #[must_use]
    pub fn has_error(&self) -> bool {
        self.inner.state.lock().error.is_some()
    }

    /// Records a failure, replacing any previous one.
    pub fn set_error(&self, error: anyhow::Error) {
        self.inner.state.lock().error = Some(Arc::new(error));
    }

    /// Records a failure only if none is outstanding. Returns whether it was recorded.
    pub fn set_error_if_absent(&self, error: anyhow::Error) -> bool {
        let mut state = self.inner.state.lock();
        if state.error.is_some() {
            return false;
        }
        state.error = Some(Arc::new(error));
        true
    }

    pub fn take_error(&self) -> Option<Arc<anyhow::Error>> {
        self.inner.state.lock().error.take()
    }

    // -- messages -----------------------------------------------------------

    /// Runs `f` with mutable access to the in message.
    ///
    /// `f` runs under the exchange lock and must not call back into the exchange.
    pub fn with_in<R>(&self, f: impl FnOnce(&mut Message) -> R) -> R {
        f(&mut self.inner.state.lock().in_message)
    }

    /// Runs `f` with mutable access to the out message, if one exists.
    ///
    /// `f` runs under the exchange lock and must not call back into the exchange.
    pub fn with_out<R>(&self, f: impl FnOnce(Option<&mut Message>) -> R) -> R {
        f(self.inner.state.lock().out_message.as_mut())
    }

    pub fn set_in_body(&self, body: impl Into<Body>) {
        self.inner.state.lock().in_message.body = body.into();
    }

    /// Removes and returns the in body, leaving [`Body::Empty`].
    pub fn take_in_body(&self) -> Body {
        std::mem::take(&mut self.inner.state.lock().in_message.body)
    }

    /// A copy of the in body's structured value, if it holds one.
    #[must_use]
    pub fn in_value(&self) -> Option<Value> {
        self.inner.state.lock().in_message.body.as_value().cloned()
    }

    pub fn set_in_header(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.inner
            .state
            .lock()
            .in_message
            .headers
            .insert(name.into(), value.into());
    }

    #[must_use]
    pub fn has_out(&self) -> bool {
        self.inner.state.lock().out_message.is_some()
    }

    /// Sets the out body, creating the out message if absent.
    pub fn set_out_body(&self, body: impl Into<Body>) {
        self.inner
            .state
            .lock()
            .out_message
            .get_or_insert_with(Message::default)
            .body = body.into();
    }

    // -- unit of work -------------------------------------------------------

    #[must_use]
    pub fn unit_of_work(&self) -> Option<Arc<dyn UnitOfWork>> {
        self.inner.state.lock().unit_of_work.clone()
    }

    pub fn set_unit_of_work(&self, unit_of_work: Option<Arc<dyn UnitOfWork>>) {
        self.inner.state.lock().unit_of_work = unit_of_work;
    }

    // -- from route ---------------------------------------------------------

    /// Route the exchange originated from, if stamped.
    #[must_use]
    pub fn from_route_id(&self) -> Option<String> {
        self.inner.state.lock().from_route_id.clone()
    }

    pub fn set_from_route_id(&self, route_id: impl Into<String>) {
        self.inner.state.lock().from_route_id = Some(route_id.into());
    }

    // -- message history ----------------------------------------------------

    /// Appends a history entry, creating the list on first use.
    pub fn push_history(&self, entry: Arc<MessageHistory>) {
        self.inner
            .state
            .lock()
            .history
            .get_or_insert_with(Vec::new)
            .push(entry);
    }

    /// Snapshot of the history list; `None` until the first entry is pushed.
    #[must_use]
    pub fn message_history(&self) -> Option<Vec<Arc<MessageHistory>>> {
        self.inner.state.lock().history.clone()
    }
}

impl Default for Exchange {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("id", &self.inner.id)
            .field("transacted", &self.is_transacted())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Exchange[{}]", self.inner.id)
    }
}

#[cfg(test)]
mod tests {
    use crate::clock::ManualClock;

    use super::*;

    #[test]
    fn new_exchange_has_unique_id_and_created_stamp() {
        let a = Exchange::new();
        let b = Exchange::new();
        assert_ne!(a.id(), b.id());
        assert!(a.property(properties::CREATED_TIMESTAMP).is_some());
    }

    #[test]
    fn with_id_uses_injected_clock() {
        let clock = ManualClock::new(1_700_000_000_000);
        let exchange = Exchange::with_id("ex-1", &clock);
        assert_eq!(exchange.id(), "ex-1");
        assert_eq!(exchange.created_ms(), 1_700_000_000_000);
        assert_eq!(
            exchange.property(properties::CREATED_TIMESTAMP),
            Some(Value::Int(1_700_000_000_000))
        );
    }

    #[test]
    fn clones_share_state() {
        let exchange = Exchange::new();
        let clone = exchange.clone();
        clone.set_property("k", "v");
        clone.set_transacted(true);
        assert_eq!(exchange.property("k"), Some(Value::from("v")));
        assert!(exchange.is_transacted());
        assert!(exchange.ptr_eq(&clone));
    }

    #[test]
    fn error_slot_holds_at_most_one_failure() {
        let exchange = Exchange::new();
        assert!(!exchange.has_error());

        exchange.set_error(anyhow::anyhow!("first"));
        exchange.set_error(anyhow::anyhow!("second"));
        assert_eq!(exchange.error().unwrap().to_string(), "second");

        assert!(!exchange.set_error_if_absent(anyhow::anyhow!("third")));
        assert_eq!(exchange.error().unwrap().to_string(), "second");

        assert!(exchange.take_error().is_some());
        assert!(exchange.set_error_if_absent(anyhow::anyhow!("fourth")));
        assert_eq!(exchange.error().unwrap().to_string(), "fourth");
    }

    #[test]
    fn stop_routing_sets_flag_property() {
        let exchange = Exchange::new();
        exchange.stop_routing();
        assert_eq!(
            exchange.property(properties::ROUTE_STOP).and_then(|v| v.coerce_bool()),
            Some(true)
        );
    }

    #[test]
    fn out_message_created_on_demand() {
        let exchange = Exchange::with_body(Value::from("in"));
        assert!(!exchange.has_out());
        exchange.set_out_body(Value::from("out"));
        assert!(exchange.has_out());
        let out = exchange.with_out(|m| m.and_then(|m| m.body.as_value().cloned()));
        assert_eq!(out, Some(Value::from("out")));
        assert_eq!(exchange.in_value(), Some(Value::from("in")));
    }

    #[test]
    fn take_in_body_leaves_empty() {
        let exchange = Exchange::with_body(Value::Int(1));
        let body = exchange.take_in_body();
        assert_eq!(body.as_value(), Some(&Value::Int(1)));
        assert!(exchange.with_in(|m| m.body.is_empty()));
    }

    #[test]
    fn history_list_created_on_first_push() {
        let exchange = Exchange::new();
        assert!(exchange.message_history().is_none());
        exchange.push_history(Arc::new(MessageHistory::new(None, "n1", 0)));
        exchange.push_history(Arc::new(MessageHistory::new(None, "n2", 0)));
        let history = exchange.message_history().unwrap();
        let nodes: Vec<_> = history.iter().map(|h| h.node_id().to_string()).collect();
        assert_eq!(nodes, vec!["n1", "n2"]);
    }

    #[test]
    fn from_route_id_round_trips() {
        let exchange = Exchange::new();
        assert!(exchange.from_route_id().is_none());
        exchange.set_from_route_id("route-a");
        assert_eq!(exchange.from_route_id().as_deref(), Some("route-a"));
    }

    #[test]
    fn exchange_is_send_and_sync() {
        fn _assert<T: Send + Sync>() {}
        _assert::<Exchange>();
    }
}

//! Backlog tracer: captures a bounded backlog of trace events per node.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use switchyard_core::{Body, ClockSource, Exchange, NodeDefinition, SystemClock, Value};

use crate::advice::{Advice, LOWEST};
use crate::config::TracerConfig;

/// One captured trace record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEvent {
    pub uid: u64,
    pub timestamp_ms: u64,
    pub route_id: Option<String>,
    /// `None` for the synthetic route-entry event.
    pub node_id: Option<String>,
    pub exchange_id: String,
    /// JSON dump of the in message, truncated to the configured length.
    pub message: String,
}

/// Collects trace events into a bounded backlog; the oldest are evicted first.
pub struct BacklogTracer {
    config: TracerConfig,
    enabled: AtomicBool,
    counter: AtomicU64,
    /// Node ids to trace. `None` traces every node.
    filter: RwLock<Option<HashSet<String>>>,
    backlog: Mutex<VecDeque<TraceEvent>>,
    clock: Arc<dyn ClockSource>,
}

impl BacklogTracer {
    /// Creates a disabled tracer.
    #[must_use]
    pub fn new(config: TracerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(config: TracerConfig, clock: Arc<dyn ClockSource>) -> Self {
        Self {
            config,
            enabled: AtomicBool::new(false),
            counter: AtomicU64::new(0),
            filter: RwLock::new(None),
            backlog: Mutex::new(VecDeque::new()),
            clock,
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Restricts tracing to the given node ids; `None` traces everything.
    pub fn set_node_filter(&self, nodes: Option<HashSet<String>>) {
        *self.filter.write() = nodes;
    }

    /// Whether a step on `node` should be traced.
    #[must_use]
    pub fn should_trace(&self, node: &NodeDefinition) -> bool {
        if !self.is_enabled() {
            return false;
        }
        match &*self.filter.read() {
            Some(nodes) => nodes.contains(&node.id),
            None => true,
        }
    }

    /// Next event uid, starting at 1.
    pub fn next_uid(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[must_use]
    pub fn trace_counter(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Appends an event, evicting the oldest if the backlog is full.
    pub fn trace_event(&self, event: TraceEvent) {
        let mut backlog = self.backlog.lock();
        while backlog.len() >= self.config.backlog_size.max(1) {
            backlog.pop_front();
        }
        backlog.push_back(event);
    }

    /// Drains and returns every retained event, oldest first.
    pub fn dump_all_traced_messages(&self) -> Vec<TraceEvent> {
        self.backlog.lock().drain(..).collect()
    }

    /// Drains every retained event as a JSON array.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn dump_all_traced_messages_as_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.dump_all_traced_messages())
    }

    /// Events currently retained, without draining.
    #[must_use]
    pub fn backlog_len(&self) -> usize {
        self.backlog.lock().len()
    }

    pub fn clear(&self) {
        self.backlog.lock().clear();
    }

    fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Renders the in message of `exchange` as JSON text.
    fn dump_message(&self, exchange: &Exchange) -> String {
        enum Snapshot {
            Empty,
            Value(Value),
            Stream,
            Cached(Arc<dyn switchyard_core::StreamCache>),
        }

        let (headers, body) = exchange.with_in(|m| {
            let body = match &m.body {
                Body::Empty => Snapshot::Empty,
                Body::Value(v) => Snapshot::Value(v.clone()),
                Body::Stream(_) => Snapshot::Stream,
                Body::Cached(c) => Snapshot::Cached(Arc::clone(c)),
            };
            (m.headers.clone(), body)
        });

        let body = match body {
            Snapshot::Empty => serde_json::Value::Null,
            Snapshot::Value(v) => v.to_json(),
            Snapshot::Stream => serde_json::Value::String("[Body is instance of stream]".into()),
            Snapshot::Cached(cache) if self.config.include_streams => {
                serde_json::Value::String(String::from_utf8_lossy(&cache.to_bytes()).into_owned())
            }
            Snapshot::Cached(_) => serde_json::Value::String("[Body is stream cache]".into()),
        };
        let headers: serde_json::Map<String, serde_json::Value> =
            headers.into_iter().map(|(k, v)| (k, v.to_json())).collect();

        let dump = serde_json::json!({ "headers": headers, "body": body }).to_string();
        truncate_chars(dump, self.config.body_max_chars)
    }
}

impl std::fmt::Debug for BacklogTracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BacklogTracer")
            .field("enabled", &self.is_enabled())
            .field("backlog", &self.backlog_len())
            .finish_non_exhaustive()
    }
}

fn truncate_chars(mut text: String, max_chars: usize) -> String {
    if let Some((idx, _)) = text.char_indices().nth(max_chars) {
        text.truncate(idx);
    }
    text
}

/// Records a [`TraceEvent`] just before the step is dispatched.
///
/// The first node of a route additionally records a synthetic route-entry
/// event stamped with the exchange's creation time.
pub struct TracerAdvice {
    tracer: Arc<BacklogTracer>,
    node: NodeDefinition,
    first: bool,
}

impl TracerAdvice {
    #[must_use]
    pub fn new(tracer: Arc<BacklogTracer>, node: NodeDefinition, first: bool) -> Self {
        Self {
            tracer,
            node,
            first,
        }
    }
}

impl Advice for TracerAdvice {
    type State = ();

    fn name(&self) -> &'static str {
        "backlog-tracer"
    }

    fn before(&self, exchange: &Exchange) -> anyhow::Result<()> {
        if !self.tracer.should_trace(&self.node) {
            return Ok(());
        }
        let timestamp_ms = self.tracer.now();
        let message = self.tracer.dump_message(exchange);
        let route_id = self.node.route_id.clone();

        if self.first {
            self.tracer.trace_event(TraceEvent {
                uid: self.tracer.next_uid(),
                timestamp_ms: exchange.created_ms(),
                route_id: route_id.clone(),
                node_id: None,
                exchange_id: exchange.id().to_string(),
                message: message.clone(),
            });
        }
        self.tracer.trace_event(TraceEvent {
            uid: self.tracer.next_uid(),
            timestamp_ms,
            route_id,
            node_id: Some(self.node.id.clone()),
            exchange_id: exchange.id().to_string(),
            message,
        });
        Ok(())
    }

    fn after(&self, _exchange: &Exchange, (): ()) -> anyhow::Result<()> {
        Ok(())
    }

    fn priority(&self) -> Option<i32> {
        Some(LOWEST - 1)
    }
}

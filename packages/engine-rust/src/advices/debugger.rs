//! Backlog debugger: breakpoints and single-step notifications per node.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashSet;
use parking_lot::Mutex;
use switchyard_core::{Exchange, NodeDefinition};

use crate::advice::{Advice, LOWEST};

/// A notification recorded by the debugger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebuggerEvent {
    /// The exchange reached a breakpoint (or single-step) on `node_id`.
    BeforeProcess { exchange_id: String, node_id: String },
    /// The node finished processing the exchange.
    AfterProcess {
        exchange_id: String,
        node_id: String,
        elapsed: Duration,
    },
}

/// Debugger with per-node breakpoints and a single-step mode.
#[derive(Debug, Default)]
pub struct BacklogDebugger {
    enabled: AtomicBool,
    single_step: AtomicBool,
    breakpoints: DashSet<String>,
    events: Mutex<Vec<DebuggerEvent>>,
}

impl BacklogDebugger {
    /// Creates a disabled debugger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_single_step_mode(&self, single_step: bool) {
        self.single_step.store(single_step, Ordering::Release);
    }

    #[must_use]
    pub fn is_single_step_mode(&self) -> bool {
        self.single_step.load(Ordering::Acquire)
    }

    pub fn add_breakpoint(&self, node_id: impl Into<String>) {
        self.breakpoints.insert(node_id.into());
    }

    pub fn remove_breakpoint(&self, node_id: &str) {
        self.breakpoints.remove(node_id);
    }

    #[must_use]
    pub fn has_breakpoint(&self, node_id: &str) -> bool {
        self.breakpoints.contains(node_id)
    }

    /// Whether a step on `node_id` must be reported.
    #[must_use]
    pub fn should_debug(&self, node_id: &str) -> bool {
        self.is_enabled() && (self.has_breakpoint(node_id) || self.is_single_step_mode())
    }

    pub fn before_process(&self, exchange: &Exchange, node: &NodeDefinition) {
        tracing::info!(exchange_id = %exchange.id(), node = %node.id, "debugger: exchange at breakpoint");
        self.events.lock().push(DebuggerEvent::BeforeProcess {
            exchange_id: exchange.id().to_string(),
            node_id: node.id.clone(),
        });
    }

    pub fn after_process(&self, exchange: &Exchange, node: &NodeDefinition, elapsed: Duration) {
        tracing::info!(
            exchange_id = %exchange.id(),
            node = %node.id,
            elapsed_ms = elapsed.as_millis(),
            "debugger: node completed"
        );
        self.events.lock().push(DebuggerEvent::AfterProcess {
            exchange_id: exchange.id().to_string(),
            node_id: node.id.clone(),
            elapsed,
        });
    }

    /// Drains recorded notifications, oldest first.
    pub fn take_events(&self) -> Vec<DebuggerEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

/// Reports a step to the [`BacklogDebugger`] immediately before dispatch and
/// its elapsed time after completion.
pub struct DebuggerAdvice {
    debugger: Arc<BacklogDebugger>,
    node: NodeDefinition,
}

impl DebuggerAdvice {
    #[must_use]
    pub fn new(debugger: Arc<BacklogDebugger>, node: NodeDefinition) -> Self {
        Self { debugger, node }
    }
}

impl Advice for DebuggerAdvice {
    /// Start of timing, when the step is being debugged.
    type State = Option<Instant>;

    fn name(&self) -> &'static str {
        "backlog-debugger"
    }

    fn before(&self, exchange: &Exchange) -> anyhow::Result<Option<Instant>> {
        if !self.debugger.should_debug(&self.node.id) {
            return Ok(None);
        }
        let started = Instant::now();
        self.debugger.before_process(exchange, &self.node);
        Ok(Some(started))
    }

    fn after(&self, exchange: &Exchange, started: Option<Instant>) -> anyhow::Result<()> {
        if let Some(started) = started {
            self.debugger
                .after_process(exchange, &self.node, started.elapsed());
        }
        Ok(())
    }

    fn priority(&self) -> Option<i32> {
        Some(LOWEST)
    }
}

//! Message history: which nodes an exchange visited, and for how long.

use std::sync::Arc;

use switchyard_core::{ClockSource, Exchange, MessageHistory, NodeDefinition, SystemClock};

use crate::advice::Advice;

/// Creates history entries.
pub trait MessageHistoryFactory: Send + Sync {
    fn new_message_history(
        &self,
        route_id: Option<String>,
        node: &NodeDefinition,
        timestamp_ms: u64,
    ) -> Arc<MessageHistory>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultMessageHistoryFactory;

impl MessageHistoryFactory for DefaultMessageHistoryFactory {
    fn new_message_history(
        &self,
        route_id: Option<String>,
        node: &NodeDefinition,
        timestamp_ms: u64,
    ) -> Arc<MessageHistory> {
        Arc::new(MessageHistory::new(route_id, node.id.clone(), timestamp_ms))
    }
}

/// Appends a history entry for this node in `before` and marks it done in
/// `after`.
///
/// Nodes outside any route (error handlers, interceptors) take the route id
/// from the unit of work's current route context.
pub struct MessageHistoryAdvice {
    factory: Arc<dyn MessageHistoryFactory>,
    node: NodeDefinition,
    clock: Arc<dyn ClockSource>,
}

impl MessageHistoryAdvice {
    #[must_use]
    pub fn new(factory: Arc<dyn MessageHistoryFactory>, node: NodeDefinition) -> Self {
        Self::with_clock(factory, node, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(
        factory: Arc<dyn MessageHistoryFactory>,
        node: NodeDefinition,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        Self {
            factory,
            node,
            clock,
        }
    }
}

impl Advice for MessageHistoryAdvice {
    type State = Arc<MessageHistory>;

    fn name(&self) -> &'static str {
        "message-history"
    }

    fn before(&self, exchange: &Exchange) -> anyhow::Result<Self::State> {
        let route_id = self.node.route_id.clone().or_else(|| {
            exchange
                .unit_of_work()
                .and_then(|uow| uow.route_context())
                .map(|ctx| ctx.route_id)
        });
        let history = self
            .factory
            .new_message_history(route_id, &self.node, self.clock.now());
        exchange.push_history(Arc::clone(&history));
        Ok(history)
    }

    fn after(&self, _exchange: &Exchange, history: Self::State) -> anyhow::Result<()> {
        history.node_processing_done();
        Ok(())
    }
}

//! Route lifecycle notifications on the exchange's unit of work.

use switchyard_core::{Exchange, RouteContext};

use crate::advice::Advice;

/// Notifies the attached unit of work before and after the exchange is
/// routed through `route`.
#[derive(Debug, Clone)]
pub struct RouteLifecycleAdvice {
    route: RouteContext,
}

impl RouteLifecycleAdvice {
    #[must_use]
    pub fn new(route: RouteContext) -> Self {
        Self { route }
    }
}

impl Advice for RouteLifecycleAdvice {
    type State = ();

    fn name(&self) -> &'static str {
        "route-lifecycle"
    }

    fn before(&self, exchange: &Exchange) -> anyhow::Result<()> {
        if let Some(uow) = exchange.unit_of_work() {
            uow.before_route(exchange, &self.route);
        }
        Ok(())
    }

    fn after(&self, exchange: &Exchange, (): ()) -> anyhow::Result<()> {
        if let Some(uow) = exchange.unit_of_work() {
            uow.after_route(exchange, &self.route);
        }
        Ok(())
    }
}

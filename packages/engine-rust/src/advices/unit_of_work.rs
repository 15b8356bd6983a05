//! Advices managing the exchange's unit of work.

use std::sync::Arc;

use switchyard_core::{Exchange, RouteContext, UnitOfWork};

use crate::advice::Advice;
use crate::error::EngineError;
use crate::unit_of_work::{done_unit_of_work, UnitOfWorkFactory};

/// Where a [`UnitOfWorkAdvice`] gets new units of work from.
#[derive(Clone)]
pub enum UnitOfWorkSource {
    /// A fresh unit of work from the factory.
    Factory(Arc<dyn UnitOfWorkFactory>),
    /// A child of a parent unit of work shared by a containing construct.
    Parent(Arc<dyn UnitOfWork>),
}

impl UnitOfWorkSource {
    fn create(&self, exchange: &Exchange) -> Arc<dyn UnitOfWork> {
        match self {
            Self::Factory(factory) => factory.create_unit_of_work(exchange),
            Self::Parent(parent) => parent.create_child(exchange),
        }
    }
}

/// Ensures the exchange has a unit of work for the duration of a route.
///
/// `before` creates, attaches and starts one when the exchange has none, and
/// pushes the route context onto whichever unit of work is attached. The
/// state is the unit of work created by this invocation, if any: only its
/// creator terminates it. `after` terminates a created unit of work and pops
/// the route context.
#[derive(Clone)]
pub struct UnitOfWorkAdvice {
    route: Option<RouteContext>,
    source: UnitOfWorkSource,
}

impl UnitOfWorkAdvice {
    /// Creates units of work with `factory`.
    #[must_use]
    pub fn new(route: Option<RouteContext>, factory: Arc<dyn UnitOfWorkFactory>) -> Self {
        Self {
            route,
            source: UnitOfWorkSource::Factory(factory),
        }
    }

    /// Creates units of work as children of `parent`.
    #[must_use]
    pub fn child(route: Option<RouteContext>, parent: Arc<dyn UnitOfWork>) -> Self {
        Self {
            route,
            source: UnitOfWorkSource::Parent(parent),
        }
    }

    #[must_use]
    pub fn route(&self) -> Option<&RouteContext> {
        self.route.as_ref()
    }

    #[must_use]
    pub fn source(&self) -> &UnitOfWorkSource {
        &self.source
    }
}

impl Advice for UnitOfWorkAdvice {
    type State = Option<Arc<dyn UnitOfWork>>;

    fn name(&self) -> &'static str {
        match self.source {
            UnitOfWorkSource::Factory(_) => "unit-of-work",
            UnitOfWorkSource::Parent(_) => "child-unit-of-work",
        }
    }

    fn before(&self, exchange: &Exchange) -> anyhow::Result<Self::State> {
        if let Some(route) = &self.route {
            if exchange.from_route_id().is_none() {
                exchange.set_from_route_id(route.route_id.clone());
            }
        }

        let created = if exchange.unit_of_work().is_none() {
            let uow = self.source.create(exchange);
            exchange.set_unit_of_work(Some(Arc::clone(&uow)));
            uow.start()?;
            Some(uow)
        } else {
            None
        };

        if let (Some(route), Some(existing)) = (&self.route, exchange.unit_of_work()) {
            existing.push_route_context(route.clone());
        }

        Ok(created)
    }

    fn after(&self, exchange: &Exchange, created: Self::State) -> anyhow::Result<()> {
        let existing = exchange.unit_of_work();

        if let Some(uow) = created {
            done_unit_of_work(uow.as_ref(), exchange);
        }

        if let (Some(_), Some(existing)) = (&self.route, existing) {
            existing.pop_route_context();
        }
        Ok(())
    }
}

/// Opens a savepoint-style nested scope on the exchange's existing unit of
/// work for the duration of a step.
#[derive(Debug, Default, Clone, Copy)]
pub struct SubUnitOfWorkAdvice;

impl Advice for SubUnitOfWorkAdvice {
    type State = Arc<dyn UnitOfWork>;

    fn name(&self) -> &'static str {
        "sub-unit-of-work"
    }

    fn before(&self, exchange: &Exchange) -> anyhow::Result<Self::State> {
        let uow = exchange
            .unit_of_work()
            .ok_or_else(|| EngineError::MissingUnitOfWork {
                exchange_id: exchange.id().to_string(),
            })?;
        uow.begin_sub(exchange);
        Ok(uow)
    }

    fn after(&self, exchange: &Exchange, uow: Self::State) -> anyhow::Result<()> {
        uow.end_sub(exchange);
        Ok(())
    }
}

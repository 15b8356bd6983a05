//! In-flight exchange tracking.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use switchyard_core::Exchange;

use crate::advice::Advice;

/// Tracks which exchanges are currently being routed, and where.
///
/// Used as `Arc<dyn InflightRepository>`.
pub trait InflightRepository: Send + Sync {
    /// Registers `exchange` as in flight in `route_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the registration cannot be recorded; the advice
    /// propagates it and the before phase aborts.
    fn add(&self, exchange: &Exchange, route_id: &str) -> anyhow::Result<()>;

    /// Deregisters one registration of `exchange` in `route_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the registration cannot be removed.
    fn remove(&self, exchange: &Exchange, route_id: &str) -> anyhow::Result<()>;

    /// Number of distinct exchanges in flight.
    fn size(&self) -> usize;

    /// Number of exchanges in flight in `route_id`.
    fn route_size(&self, route_id: &str) -> usize;
}

/// Snapshot of one in-flight exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InflightExchange {
    pub exchange_id: String,
    /// Route the exchange was first registered in.
    pub route_id: String,
    /// How long the exchange has been in flight.
    pub duration: Duration,
}

#[derive(Debug)]
struct Entry {
    route_id: String,
    since: Instant,
    /// Nested registrations of the same exchange (e.g. sub-routes).
    depth: usize,
}

/// [`InflightRepository`] backed by `DashMap`s.
#[derive(Debug, Default)]
pub struct DefaultInflightRepository {
    exchanges: DashMap<String, Entry>,
    routes: DashMap<String, usize>,
}

impl DefaultInflightRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// In-flight exchanges, longest-running first, at most `limit` of them.
    #[must_use]
    pub fn browse(&self, limit: usize) -> Vec<InflightExchange> {
        let mut all: Vec<InflightExchange> = self
            .exchanges
            .iter()
            .map(|e| InflightExchange {
                exchange_id: e.key().clone(),
                route_id: e.route_id.clone(),
                duration: e.since.elapsed(),
            })
            .collect();
        all.sort_by(|a, b| b.duration.cmp(&a.duration));
        all.truncate(limit);
        all
    }
}

impl InflightRepository for DefaultInflightRepository {
    fn add(&self, exchange: &Exchange, route_id: &str) -> anyhow::Result<()> {
        self.exchanges
            .entry(exchange.id().to_string())
            .and_modify(|e| e.depth += 1)
            .or_insert_with(|| Entry {
                route_id: route_id.to_string(),
                since: Instant::now(),
                depth: 1,
            });
        *self.routes.entry(route_id.to_string()).or_insert(0) += 1;
        Ok(())
    }

    fn remove(&self, exchange: &Exchange, route_id: &str) -> anyhow::Result<()> {
        self.exchanges.remove_if_mut(exchange.id(), |_, e| {
            e.depth = e.depth.saturating_sub(1);
            e.depth == 0
        });
        self.routes.remove_if_mut(route_id, |_, count| {
            *count = count.saturating_sub(1);
            *count == 0
        });
        Ok(())
    }

    fn size(&self) -> usize {
        self.exchanges.len()
    }

    fn route_size(&self, route_id: &str) -> usize {
        self.routes.get(route_id).map_or(0, |c| *c)
    }
}

/// Keeps an [`InflightRepository`] up to date for one route.
pub struct InflightAdvice {
    repository: Arc<dyn InflightRepository>,
    route_id: String,
}

impl InflightAdvice {
    #[must_use]
    pub fn new(repository: Arc<dyn InflightRepository>, route_id: impl Into<String>) -> Self {
        Self {
            repository,
            route_id: route_id.into(),
        }
    }
}

impl Advice for InflightAdvice {
    type State = ();

    fn name(&self) -> &'static str {
        "inflight"
    }

    fn before(&self, exchange: &Exchange) -> anyhow::Result<()> {
        self.repository.add(exchange, &self.route_id)
    }

    fn after(&self, exchange: &Exchange, (): ()) -> anyhow::Result<()> {
        self.repository.remove(exchange, &self.route_id)
    }
}

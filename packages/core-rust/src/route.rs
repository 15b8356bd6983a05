use std::fmt;

/// Identifies the route currently processing an exchange.
///
/// Pushed onto a unit of work's route-context stack on route entry and popped
/// on exit, so collaborators can ask "which route am I in" at any depth.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteContext {
    /// Stable identifier of the route.
    pub route_id: String,
    /// Optional human-readable description (e.g. the consuming endpoint).
    pub description: Option<String>,
}

impl RouteContext {
    /// Creates a route context with no description.
    #[must_use]
    pub fn new(route_id: impl Into<String>) -> Self {
        Self {
            route_id: route_id.into(),
            description: None,
        }
    }

    /// Attaches a description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl fmt::Display for RouteContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.route_id)
    }
}

/// A single node (routing step) within a route.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeDefinition {
    /// Identifier of the node, unique within the engine.
    pub id: String,
    /// Route the node belongs to. `None` for nodes outside any route,
    /// e.g. error handlers or interceptors.
    pub route_id: Option<String>,
}

impl NodeDefinition {
    /// Creates a node belonging to `route_id`.
    #[must_use]
    pub fn new(id: impl Into<String>, route_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            route_id: Some(route_id.into()),
        }
    }

    /// Creates a node that does not belong to a route.
    #[must_use]
    pub fn detached(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            route_id: None,
        }
    }
}

use std::time::Duration;

/// What the executor does when an advice's `before` fails part-way through
/// the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BeforeFailurePolicy {
    /// Complete immediately without running any `after`, including those of
    /// advices whose `before` already succeeded.
    #[default]
    SkipAfter,
    /// Run `after`, in reverse order, for every advice whose `before`
    /// succeeded, then complete. The `before` failure stays on the exchange.
    Unwind,
}

/// Settings for the backlog tracer.
#[derive(Debug, Clone)]
pub struct TracerConfig {
    /// Maximum number of trace events retained; oldest are evicted first.
    pub backlog_size: usize,
    /// Message dumps longer than this are truncated.
    pub body_max_chars: usize,
    /// Whether cached stream bodies are rendered in dumps.
    pub include_streams: bool,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            backlog_size: 1000,
            body_max_chars: 128 * 1024,
            include_streams: false,
        }
    }
}

/// Settings for the default stream caching strategy.
#[derive(Debug, Clone)]
pub struct StreamCachingConfig {
    /// Largest stream body that may be cached in memory.
    pub max_in_memory_bytes: usize,
}

impl Default for StreamCachingConfig {
    fn default() -> Self {
        Self {
            max_in_memory_bytes: 8 * 1024 * 1024,
        }
    }
}

/// Engine-level configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Name of this engine instance, used in logs and executor ids.
    pub name: String,
    /// Behaviour on a failing `before`.
    pub before_failure_policy: BeforeFailurePolicy,
    pub tracer: TracerConfig,
    pub stream_caching: StreamCachingConfig,
    /// Fixed delay applied by delay advices, if configured.
    pub delay: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "switchyard".to_string(),
            before_failure_policy: BeforeFailurePolicy::default(),
            tracer: TracerConfig::default(),
            stream_caching: StreamCachingConfig::default(),
            delay: None,
        }
    }
}

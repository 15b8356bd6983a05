use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// One entry in an exchange's message history: the exchange visited `node_id`
/// (in `route_id`) at `timestamp_ms`.
#[derive(Debug)]
pub struct MessageHistory {
    route_id: Option<String>,
    node_id: String,
    timestamp_ms: u64,
    started: Instant,
    elapsed: Mutex<Option<Duration>>,
}

impl MessageHistory {
    /// Creates an entry for a node that has just started processing.
    #[must_use]
    pub fn new(route_id: Option<String>, node_id: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            route_id,
            node_id: node_id.into(),
            timestamp_ms,
            started: Instant::now(),
            elapsed: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn route_id(&self) -> Option<&str> {
        self.route_id.as_deref()
    }

    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Wall-clock time at which the node started processing (epoch millis).
    #[must_use]
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Marks the node as done. Only the first call records the elapsed time.
    pub fn node_processing_done(&self) {
        let mut elapsed = self.elapsed.lock();
        if elapsed.is_none() {
            *elapsed = Some(self.started.elapsed());
        }
    }

    /// Processing time, once the node is done.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        *self.elapsed.lock()
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.elapsed.lock().is_some()
    }
}

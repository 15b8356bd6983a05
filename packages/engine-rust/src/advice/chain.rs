use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::{Advice, ErasedAdvice};

/// Ordered, priority-sorted sequence of advices applied around one step.
///
/// Append-only: [`register`](Self::register) adds an advice and re-sorts by
/// priority. The sort is stable, so advices with equal priority keep their
/// registration order. There is no removal.
#[derive(Clone, Default)]
pub struct AdviceChain {
    entries: Vec<Arc<dyn ErasedAdvice>>,
}

impl AdviceChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an advice and restores priority order.
    pub fn register<A: Advice>(&mut self, advice: A) {
        self.register_shared(Arc::new(advice));
    }

    /// Appends an already shared advice and restores priority order.
    pub fn register_shared(&mut self, advice: Arc<dyn ErasedAdvice>) {
        self.entries.push(advice);
        // `sort_by_key` is stable: ties keep insertion order.
        self.entries.sort_by_key(|entry| entry.priority());
    }

    /// The first registered advice of type `T`, looking through decorators.
    #[must_use]
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.entries
            .iter()
            .find_map(|entry| entry.as_any().downcast_ref::<T>())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at `index` in execution order.
    #[must_use]
    pub fn entry(&self, index: usize) -> Option<&Arc<dyn ErasedAdvice>> {
        self.entries.get(index)
    }

    /// Entries in before-phase order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Arc<dyn ErasedAdvice>> + ExactSizeIterator {
        self.entries.iter()
    }

    /// Advice names in before-phase order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|entry| entry.name()).collect()
    }
}

impl fmt::Debug for AdviceChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

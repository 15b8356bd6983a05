use std::any::Any;

/// Type-erased value returned by an advice's `before`.
pub type AdviceState = Box<dyn Any + Send>;

/// Per-invocation arena of advice states, one slot per chain entry.
///
/// Allocated fresh for every `process` call, written during the before phase
/// and consumed slot by slot during the after phase. Ownership moves into the
/// completion continuation, so a different thread running the after phase
/// observes every write made before dispatch.
#[derive(Debug)]
pub struct AdviceStates {
    slots: Box<[Option<AdviceState>]>,
}

impl AdviceStates {
    /// An arena with `len` empty slots.
    #[must_use]
    pub fn with_len(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| None).collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Stores the state produced by the advice at `index`.
    pub fn set(&mut self, index: usize, state: AdviceState) {
        self.slots[index] = Some(state);
    }

    /// Removes and returns the state at `index`. `None` if the advice at that
    /// index never completed its `before`.
    pub fn take(&mut self, index: usize) -> Option<AdviceState> {
        self.slots.get_mut(index).and_then(Option::take)
    }

    /// Number of slots holding a state.
    #[must_use]
    pub fn filled(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

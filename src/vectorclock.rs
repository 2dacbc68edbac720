use crate::types::{ClockValue, Epoch, ThreadId};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

/// Sparse map from thread to step counter. Threads without an entry are
/// implicitly at 0.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VectorClock {
    components: HashMap<ThreadId, ClockValue>,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh clock whose owning thread already took its first step.
    pub fn of_thread(thread_id: ThreadId) -> Self {
        let mut clock = Self::new();
        clock.set(thread_id, 1);
        clock
    }

    pub fn get(&self, thread_id: ThreadId) -> ClockValue {
        self.components.get(&thread_id).copied().unwrap_or(0)
    }

    pub fn set(&mut self, thread_id: ThreadId, value: ClockValue) {
        self.components.insert(thread_id, value);
    }

    pub fn increment(&mut self, thread_id: ThreadId) {
        *self.components.entry(thread_id).or_insert(0) += 1;
    }

    /// Pointwise maximum of `other` into `self`.
    pub fn merge_into(&mut self, other: &VectorClock) {
        for (&thread_id, &value) in &other.components {
            let component = self.components.entry(thread_id).or_insert(0);
            if *component < value {
                *component = value;
            }
        }
    }

    /// Pointwise maximum as a fresh clock, leaving both inputs untouched.
    #[allow(dead_code)] // used when running tests
    pub fn merge(&self, other: &VectorClock) -> VectorClock {
        let mut merged = self.clone();
        merged.merge_into(other);
        merged
    }

    /// Strict happens-before: `self` is pointwise at most `other` and the
    /// two differ somewhere. Components absent on one side count as 0.
    pub fn less_than(&self, other: &VectorClock) -> bool {
        for (&thread_id, &value) in &self.components {
            if value > other.get(thread_id) {
                return false;
            }
        }

        other
            .components
            .iter()
            .any(|(&thread_id, &value)| value > self.get(thread_id))
    }

    /// All present components as epochs, in no particular order.
    pub fn find_all(&self) -> impl Iterator<Item = Epoch> + '_ {
        self.components
            .iter()
            .map(|(&thread_id, &value)| Epoch { thread_id, value })
    }
}

impl Display for VectorClock {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut epochs: Vec<Epoch> = self.find_all().collect();
        epochs.sort_by_key(|epoch| epoch.thread_id);

        write!(f, "{{")?;
        for epoch in epochs {
            write!(f, " T{}:{}", epoch.thread_id, epoch.value)?;
        }
        write!(f, " }}")
    }
}

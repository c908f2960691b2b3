#![forbid(unsafe_code)]

//! Type-erased storage for one stage of an endpoint.
//!
//! Stages of a single endpoint accept different value types (the first one
//! takes the producer's value, later ones take whatever the previous
//! transformation produced), so the table can't be a `Vec<Stage<T>>`. Each
//! slot instead boxes a concrete [`Stage<T>`] and remembers `T`'s name for
//! error reporting. Retrieval as the wrong type yields `None`; the caller
//! decides whether that is fatal.

use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;

/// A compiled delivery function occupying one slot.
pub type Stage<T> = Arc<dyn Fn(T) + Send + Sync>;

/// One occupied slot in an endpoint's stage table.
pub struct StageSlot {
    stage: Box<dyn Any + Send + Sync>,
    input: &'static str,
}

impl StageSlot {
    /// Erase `stage` into a slot.
    #[must_use]
    pub fn store<T: 'static>(stage: Stage<T>) -> Self {
        Self {
            stage: Box::new(stage),
            input: type_name::<T>(),
        }
    }

    /// Recover the stage if it accepts `T`.
    #[must_use]
    pub fn retrieve<T: 'static>(&self) -> Option<Stage<T>> {
        self.stage.downcast_ref::<Stage<T>>().cloned()
    }

    /// Name of the value type this slot's stage accepts.
    #[must_use]
    pub fn input_type(&self) -> &'static str {
        self.input
    }
}

impl fmt::Debug for StageSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageSlot")
            .field("input", &self.input)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn retrieve_matching_type() {
        let seen = Arc::new(AtomicI32::new(0));
        let sink = Arc::clone(&seen);
        let slot = StageSlot::store::<i32>(Arc::new(move |v| sink.store(v, Ordering::SeqCst)));

        let stage = slot.retrieve::<i32>().expect("i32 stage");
        stage(41);
        assert_eq!(seen.load(Ordering::SeqCst), 41);
    }

    #[test]
    fn retrieve_wrong_type_is_none() {
        let slot = StageSlot::store::<String>(Arc::new(|_| {}));
        assert!(slot.retrieve::<i32>().is_none());
        assert!(slot.retrieve::<&'static str>().is_none());
        assert!(slot.input_type().contains("String"));
    }
}

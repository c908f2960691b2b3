#![forbid(unsafe_code)]

use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::trace;

use super::open_endpoint;
use crate::builder::Builder;
use crate::endpoint::{EndpointId, Source};
use crate::fanout::Fanout;
use crate::lock;
use crate::mode::Syncable;

struct State<T> {
    value: T,
    version: u64,
}

struct StatefulCore<T> {
    fanout: Fanout,
    state: Mutex<State<T>>,
}

impl<T: Clone + PartialEq + Send + 'static> Source for StatefulCore<T> {
    /// Report the stored value, changed or not.
    fn pull_at(&self, id: EndpointId) {
        let Some(_busy) = self.fanout.try_begin() else {
            trace!(
                producer = "stateful",
                thread = ?thread::current().id(),
                endpoint = %id,
                "pull dropped: propagation in progress",
            );
            return;
        };
        let Some(endpoint) = self.fanout.find(id) else {
            return;
        };
        let current = lock(&self.state).value.clone();
        endpoint.deliver_at(0, current);
    }

    fn detach(&self, id: EndpointId) {
        self.fanout.detach(id);
    }
}

/// Producer that holds a current value and propagates only changes.
///
/// # Invariants
///
/// 1. `set_value(v)` stores `v` and propagates iff the *previously stored*
///    value differs from `v`.
/// 2. `version` increments by exactly 1 per propagated change.
/// 3. Pulling always delivers the stored value.
///
/// # Failure Modes
///
/// - **Contention**: a `set_value` that loses the race against an in-flight
///   propagation is dropped entirely. The stored value is left untouched.
pub struct StatefulProducer<T> {
    core: Arc<StatefulCore<T>>,
}

impl<T> Clone for StatefulProducer<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for StatefulProducer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.core.state);
        f.debug_struct("StatefulProducer")
            .field("value", &state.value)
            .field("version", &state.version)
            .field("fanout", &self.core.fanout)
            .finish()
    }
}

impl<T: Clone + PartialEq + Send + 'static> StatefulProducer<T> {
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            core: Arc::new(StatefulCore {
                fanout: Fanout::new(),
                state: Mutex::new(State { value, version: 0 }),
            }),
        }
    }

    /// Open a new chain fed by this producer.
    #[must_use]
    pub fn begin(&self) -> Builder<Syncable, T, T> {
        Builder::start(open_endpoint(&self.core, &self.core.fanout))
    }

    /// Store `value`, propagating it if it differs from the previous value.
    pub fn set_value(&self, value: T) {
        let Some(_busy) = self.core.fanout.try_begin() else {
            trace!(
                producer = "stateful",
                thread = ?thread::current().id(),
                "set_value dropped: propagation in progress",
            );
            return;
        };
        let changed = {
            let mut state = lock(&self.core.state);
            let previous = mem::replace(&mut state.value, value.clone());
            let changed = previous != value;
            if changed {
                state.version += 1;
            }
            changed
        };
        if changed {
            self.core.fanout.broadcast(&value);
        }
    }

    /// Mutate the value in place, propagating if it changed.
    ///
    /// # Deadlocks
    ///
    /// `f` runs with the state locked. Calling `value`, `with`, `version`,
    /// `set_value` or `update` on this producer from inside `f` deadlocks.
    /// Chains fed by this producer run after the lock is released and may
    /// read the value freely.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let Some(_busy) = self.core.fanout.try_begin() else {
            trace!(
                producer = "stateful",
                thread = ?thread::current().id(),
                "update dropped: propagation in progress",
            );
            return;
        };
        let changed = {
            let mut state = lock(&self.core.state);
            let previous = state.value.clone();
            f(&mut state.value);
            if state.value == previous {
                None
            } else {
                state.version += 1;
                Some(state.value.clone())
            }
        };
        if let Some(value) = changed {
            self.core.fanout.broadcast(&value);
        }
    }

    /// Clone of the stored value.
    #[must_use]
    pub fn value(&self) -> T {
        lock(&self.core.state).value.clone()
    }

    /// Borrow the stored value.
    ///
    /// # Deadlocks
    ///
    /// `f` runs with the state locked; it must not call back into this
    /// producer.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&lock(&self.core.state).value)
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        lock(&self.core.state).version
    }

    /// Registered endpoints, including dead ones not yet pruned.
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.core.fanout.len()
    }
}

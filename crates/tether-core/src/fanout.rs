#![forbid(unsafe_code)]

//! Weak registry of the endpoints a producer feeds.
//!
//! Entries are keyed by [`EndpointId`] in an ordered map, so iteration order
//! is registration order. Dead entries are removed eagerly when an endpoint
//! drops (through [`Source::detach`](crate::endpoint::Source)) and lazily on
//! every propagation, mirroring the prune-on-notify of a weak subscriber
//! list.
//!
//! No strong endpoint handle is ever dropped while the map lock is held: an
//! endpoint's destructor calls back into `detach`, which takes the same lock.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use crate::endpoint::{Endpoint, EndpointId, WeakEndpoint};
use crate::guard::{PropagationFlag, PropagationGuard};
use crate::lock;

pub(crate) struct Fanout {
    endpoints: Mutex<BTreeMap<EndpointId, WeakEndpoint>>,
    flag: PropagationFlag,
}

impl Fanout {
    pub(crate) fn new() -> Self {
        Self {
            endpoints: Mutex::new(BTreeMap::new()),
            flag: PropagationFlag::new(),
        }
    }

    pub(crate) fn try_begin(&self) -> Option<PropagationGuard<'_>> {
        self.flag.try_acquire()
    }

    pub(crate) fn register(&self, endpoint: &Endpoint) {
        lock(&self.endpoints).insert(endpoint.id(), endpoint.downgrade());
    }

    pub(crate) fn detach(&self, id: EndpointId) {
        lock(&self.endpoints).remove(&id);
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.endpoints).len()
    }

    /// Weak handles to the endpoints still alive, in registration order.
    /// Callers upgrade each one only when they reach it, so a chain torn down
    /// earlier in the same push is skipped.
    pub(crate) fn snapshot(&self) -> Vec<WeakEndpoint> {
        let mut endpoints = lock(&self.endpoints);
        endpoints.retain(|_, weak| weak.is_alive());
        endpoints.values().cloned().collect()
    }

    /// The sealed endpoint registered as `id`, if it is still alive.
    pub(crate) fn find(&self, id: EndpointId) -> Option<Endpoint> {
        let found = lock(&self.endpoints).get(&id).and_then(WeakEndpoint::upgrade);
        found.filter(Endpoint::is_sealed)
    }

    /// Deliver `value` to stage 0 of every sealed endpoint that is still
    /// alive when its turn comes.
    pub(crate) fn broadcast<T: Clone + 'static>(&self, value: &T) {
        for weak in self.snapshot() {
            let Some(endpoint) = weak.upgrade() else {
                continue;
            };
            if endpoint.is_sealed() {
                endpoint.deliver_at(0, value.clone());
            }
        }
    }
}

impl fmt::Debug for Fanout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fanout")
            .field("endpoints", &self.len())
            .field("busy", &self.flag.is_busy())
            .finish()
    }
}

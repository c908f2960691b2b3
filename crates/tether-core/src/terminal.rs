#![forbid(unsafe_code)]

//! Strong owner of a finished chain.
//!
//! A [`Terminal`] is the only strong reference to its endpoint anywhere in
//! the graph. Holding it keeps the chain reachable; dropping it (or calling
//! [`detach`](Terminal::detach)) unregisters the endpoint from its producer
//! and tears down every merged branch with it. There is no separate
//! unsubscribe step.

use std::fmt;
use std::marker::PhantomData;

use tracing::debug;

use crate::endpoint::{Endpoint, EndpointId};
use crate::mode::{Mode, Syncable};

/// Keeps a chain alive.
#[must_use = "dropping a Terminal tears its chain down immediately"]
pub struct Terminal<M> {
    endpoint: Endpoint,
    _mode: PhantomData<fn() -> M>,
}

impl<M> fmt::Debug for Terminal<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Terminal")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl<M: Mode> Terminal<M> {
    /// Seal `endpoint` and take ownership of it.
    pub(crate) fn seal(endpoint: Endpoint) -> Self {
        endpoint.seal();
        debug!(
            endpoint = %endpoint.id(),
            stages = endpoint.stage_count(),
            branches = endpoint.sub_endpoint_count(),
            "chain sealed"
        );
        Self {
            endpoint,
            _mode: PhantomData,
        }
    }

    #[must_use]
    pub fn id(&self) -> EndpointId {
        self.endpoint.id()
    }

    /// The endpoint this handle owns.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Whether the root producer is still alive.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.endpoint.has_source()
    }

    /// Tear the chain down now.
    pub fn detach(self) {
        drop(self);
    }
}

impl Terminal<Syncable> {
    /// Pull the current value of the root producer, and of every merged or
    /// paired producer, through the chain.
    pub fn sync(&self) {
        self.endpoint.pull();
    }
}

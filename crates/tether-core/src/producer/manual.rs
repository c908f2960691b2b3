#![forbid(unsafe_code)]

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread;

use tracing::trace;

use super::open_endpoint;
use crate::builder::Builder;
use crate::endpoint::{EndpointId, Source};
use crate::fanout::Fanout;
use crate::mode::PushOnly;

struct ManualCore<T> {
    fanout: Fanout,
    _value: PhantomData<fn(T)>,
}

impl<T: 'static> Source for ManualCore<T> {
    // Nothing stored, nothing to report.
    fn pull_at(&self, _id: EndpointId) {}

    fn detach(&self, id: EndpointId) {
        self.fanout.detach(id);
    }
}

/// Push-only producer.
pub struct ManualProducer<T> {
    core: Arc<ManualCore<T>>,
}

impl<T> Clone for ManualProducer<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Clone + Send + 'static> Default for ManualProducer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ManualProducer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualProducer")
            .field("fanout", &self.core.fanout)
            .finish()
    }
}

impl<T: Clone + Send + 'static> ManualProducer<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: Arc::new(ManualCore {
                fanout: Fanout::new(),
                _value: PhantomData,
            }),
        }
    }

    /// Open a new chain fed by this producer.
    #[must_use]
    pub fn begin(&self) -> Builder<PushOnly, T, T> {
        Builder::start(open_endpoint(&self.core, &self.core.fanout))
    }

    /// Deliver `value` to every live chain, in registration order.
    ///
    /// Dropped without effect if another `notify` on this producer is still
    /// propagating.
    pub fn notify(&self, value: T) {
        let Some(_busy) = self.core.fanout.try_begin() else {
            trace!(
                producer = "manual",
                thread = ?thread::current().id(),
                "notify dropped: propagation in progress",
            );
            return;
        };
        self.core.fanout.broadcast(&value);
    }

    /// Registered endpoints, including dead ones not yet pruned.
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.core.fanout.len()
    }
}

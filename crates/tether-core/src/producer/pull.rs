#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;
use std::thread;

use tracing::trace;

use super::open_endpoint;
use crate::builder::Builder;
use crate::endpoint::{EndpointId, Source};
use crate::fanout::Fanout;
use crate::mode::Syncable;

type FetchFn<T> = Box<dyn Fn() -> Option<T> + Send + Sync>;

struct PullCore<T> {
    fanout: Fanout,
    fetch: FetchFn<T>,
}

impl<T: Clone + Send + 'static> Source for PullCore<T> {
    fn pull_at(&self, id: EndpointId) {
        let Some(_busy) = self.fanout.try_begin() else {
            trace!(
                producer = "pull",
                thread = ?thread::current().id(),
                endpoint = %id,
                "pull dropped: propagation in progress",
            );
            return;
        };
        let Some(endpoint) = self.fanout.find(id) else {
            return;
        };
        if let Some(value) = (self.fetch)() {
            endpoint.deliver_at(0, value);
        }
    }

    fn detach(&self, id: EndpointId) {
        self.fanout.detach(id);
    }
}

/// Producer that computes its value on demand.
///
/// The function returns `None` when there is nothing to report; that is a
/// normal outcome and nothing is delivered.
pub struct PullProducer<T> {
    core: Arc<PullCore<T>>,
}

impl<T> Clone for PullProducer<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> fmt::Debug for PullProducer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PullProducer")
            .field("fanout", &self.core.fanout)
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + 'static> PullProducer<T> {
    #[must_use]
    pub fn new(fetch: impl Fn() -> Option<T> + Send + Sync + 'static) -> Self {
        Self {
            core: Arc::new(PullCore {
                fanout: Fanout::new(),
                fetch: Box::new(fetch),
            }),
        }
    }

    /// Open a new chain fed by this producer.
    #[must_use]
    pub fn begin(&self) -> Builder<Syncable, T, T> {
        Builder::start(open_endpoint(&self.core, &self.core.fanout))
    }

    /// Compute the value and deliver it to every live chain.
    pub fn fetch(&self) {
        let Some(_busy) = self.core.fanout.try_begin() else {
            trace!(
                producer = "pull",
                thread = ?thread::current().id(),
                "fetch dropped: propagation in progress",
            );
            return;
        };
        if let Some(value) = (self.core.fetch)() {
            self.core.fanout.broadcast(&value);
        }
    }

    /// Registered endpoints, including dead ones not yet pruned.
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.core.fanout.len()
    }
}

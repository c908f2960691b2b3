#![forbid(unsafe_code)]

//! Per-registration dispatch table.
//!
//! # Design
//!
//! Every call to a producer's `begin()` opens one [`Endpoint`]: an ordered
//! table of stages plus a list of sub-endpoints that merged/paired branches
//! hand over for pull propagation. The producer keeps only a weak reference
//! (keyed by [`EndpointId`]); the terminal handle returned by `end()` is the
//! single strong owner. When that owner goes away the endpoint unregisters
//! itself from its producer and drops its sub-endpoints, which unregister in
//! turn.
//!
//! An endpoint is either *under construction* (stages may be installed) or
//! *sealed* (delivery only). Producers skip endpoints that are not sealed
//! yet, so a half-built chain is never reached by a push.
//!
//! # Failure Modes
//!
//! - **Missing stage**: delivering to a slot nobody filled panics with
//!   [`ChainError::MissingStage`]. Use [`Endpoint::try_deliver_at`] to get
//!   the error instead.
//! - **Type mismatch**: delivering a value of the wrong type to a slot panics
//!   with [`ChainError::StageTypeMismatch`].

use std::any::type_name;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use tracing::debug;

use crate::error::ChainError;
use crate::lock;
use crate::slot::{Stage, StageSlot};

/// Stable identity of an endpoint.
///
/// Ids are handed out from a process-wide counter, so ordering by id is
/// ordering by registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndpointId(u64);

impl EndpointId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw numeric identity.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ep#{}", self.0)
    }
}

/// The producer side of an endpoint, as seen from the endpoint.
pub(crate) trait Source: Send + Sync {
    /// Re-deliver the current value into the endpoint registered as `id`.
    fn pull_at(&self, id: EndpointId);
    /// Forget the endpoint registered as `id`.
    fn detach(&self, id: EndpointId);
}

struct EndpointInner {
    id: EndpointId,
    stages: RwLock<Vec<Option<StageSlot>>>,
    sealed: AtomicBool,
    subs: Mutex<Vec<Endpoint>>,
    source: Weak<dyn Source>,
}

impl Drop for EndpointInner {
    fn drop(&mut self) {
        let stages = self
            .stages
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        debug!(endpoint = %self.id, stages, "endpoint torn down");
        if let Some(source) = self.source.upgrade() {
            source.detach(self.id);
        }
        // `subs` drops after this, tearing down merged branches.
    }
}

/// Strong handle to an endpoint's storage.
///
/// Only the crate clones these; outside code reaches an endpoint through
/// [`Terminal::endpoint`](crate::Terminal::endpoint).
pub struct Endpoint {
    inner: Arc<EndpointInner>,
}

impl Endpoint {
    /// Open an endpoint fed by `source`.
    pub(crate) fn attached(source: Weak<dyn Source>) -> Self {
        let id = EndpointId::next();
        debug!(endpoint = %id, "endpoint opened");
        Self {
            inner: Arc::new(EndpointInner {
                id,
                stages: RwLock::new(Vec::new()),
                sealed: AtomicBool::new(false),
                subs: Mutex::new(Vec::new()),
                source,
            }),
        }
    }

    pub(crate) fn share(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakEndpoint {
        WeakEndpoint(Arc::downgrade(&self.inner))
    }

    #[must_use]
    pub fn id(&self) -> EndpointId {
        self.inner.id
    }

    /// Number of slots, filled or reserved.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.inner
            .stages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn sub_endpoint_count(&self) -> usize {
        lock(&self.inner.subs).len()
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.inner.sealed.load(Ordering::Acquire)
    }

    /// Reserve the next slot and return its index. The slot stays empty until
    /// [`install`](Self::install) fills it.
    pub(crate) fn reserve_slot(&self) -> usize {
        let mut stages = self
            .inner
            .stages
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        stages.push(None);
        stages.len() - 1
    }

    /// Fill slot `index` with `stage`.
    pub(crate) fn install<T: 'static>(&self, index: usize, stage: Stage<T>) -> Result<(), ChainError> {
        if self.is_sealed() {
            return Err(ChainError::Sealed {
                endpoint: self.inner.id,
            });
        }
        let mut stages = self
            .inner
            .stages
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if stages.len() <= index {
            stages.resize_with(index + 1, || None);
        }
        stages[index] = Some(StageSlot::store(stage));
        Ok(())
    }

    /// Append `stage` and return the slot it landed in.
    #[cfg(test)]
    #[track_caller]
    pub(crate) fn push_stage<T: 'static>(&self, stage: impl Fn(T) + Send + Sync + 'static) -> usize {
        let index = self.reserve_slot();
        if let Err(err) = self.install::<T>(index, Arc::new(stage)) {
            panic!("cannot extend chain: {err}");
        }
        index
    }

    /// Invoke the stage at `index` with `value`.
    ///
    /// The table lock is released before the stage runs, so stages may
    /// deliver further into the same endpoint.
    pub fn try_deliver_at<T: 'static>(&self, index: usize, value: T) -> Result<(), ChainError> {
        let stage = {
            let stages = self
                .inner
                .stages
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            let slot = stages
                .get(index)
                .and_then(Option::as_ref)
                .ok_or(ChainError::MissingStage {
                    endpoint: self.inner.id,
                    index,
                })?;
            slot.retrieve::<T>()
                .ok_or_else(|| ChainError::StageTypeMismatch {
                    endpoint: self.inner.id,
                    index,
                    expected: type_name::<T>(),
                    found: slot.input_type(),
                })?
        };
        stage(value);
        Ok(())
    }

    /// Invoke the stage at `index` with `value`.
    ///
    /// # Panics
    ///
    /// Panics if no stage of a matching type occupies `index`: the chain was
    /// left incomplete.
    #[track_caller]
    pub fn deliver_at<T: 'static>(&self, index: usize, value: T) {
        if let Err(err) = self.try_deliver_at(index, value) {
            panic!("incomplete chain: {err}");
        }
    }

    /// Ask the producer to re-deliver its current value into this endpoint,
    /// then pull every sub-endpoint.
    pub fn pull(&self) {
        if let Some(source) = self.inner.source.upgrade() {
            source.pull_at(self.inner.id);
        }
        let subs: Vec<Endpoint> = lock(&self.inner.subs).iter().map(Endpoint::share).collect();
        for sub in &subs {
            sub.pull();
        }
    }

    /// Hand `sub` over to this endpoint. It is pulled after this one and lives
    /// exactly as long as this one.
    pub(crate) fn add_sub_endpoint(&self, sub: Endpoint) {
        lock(&self.inner.subs).push(sub);
    }

    /// Freeze the stage table of this endpoint and all of its sub-endpoints.
    pub(crate) fn seal(&self) {
        self.inner.sealed.store(true, Ordering::Release);
        for sub in lock(&self.inner.subs).iter() {
            sub.seal();
        }
    }

    /// Whether the producer feeding this endpoint is still alive.
    #[must_use]
    pub fn has_source(&self) -> bool {
        self.inner.source.strong_count() > 0
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.inner.id)
            .field("stages", &self.stage_count())
            .field("sealed", &self.is_sealed())
            .field("sub_endpoints", &self.sub_endpoint_count())
            .finish()
    }
}

/// Weak handle held by producers and by stages that forward into an
/// endpoint.
#[derive(Clone)]
pub(crate) struct WeakEndpoint(Weak<EndpointInner>);

impl WeakEndpoint {
    pub(crate) fn upgrade(&self) -> Option<Endpoint> {
        self.0.upgrade().map(|inner| Endpoint { inner })
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

#![forbid(unsafe_code)]

//! Value sources.
//!
//! - [`ManualProducer`]: push-only, `notify(value)`.
//! - [`PullProducer`]: computes a value on demand, `fetch()`.
//! - [`StatefulProducer`]: stores the current value and only propagates
//!   changes, `set_value(value)`.
//!
//! # Architecture
//!
//! Each producer is a cheap handle around an `Arc` core that owns a weak
//! registry of the endpoints opened by `begin()`. Cloning a producer gives
//! another handle to the same core. Endpoints reach back to the core through
//! a `Weak<dyn Source>` for pull and for unregistering themselves.
//!
//! # Invariants
//!
//! 1. A push visits every live, sealed endpoint exactly once, in
//!    registration order.
//! 2. A push or pull that finds another propagation in progress on the same
//!    producer is dropped, never queued and never blocking.
//! 3. Endpoints whose terminal handle is gone are never delivered to.

mod manual;
mod pull;
mod stateful;

pub use manual::ManualProducer;
pub use pull::PullProducer;
pub use stateful::StatefulProducer;

use std::sync::{Arc, Weak};

use crate::endpoint::{Endpoint, Source};
use crate::fanout::Fanout;

/// Open a new endpoint on `core` and register it in `fanout`.
fn open_endpoint<S: Source + 'static>(core: &Arc<S>, fanout: &Fanout) -> Endpoint {
    let source: Weak<dyn Source> = Arc::downgrade(core) as Weak<dyn Source>;
    let endpoint = Endpoint::attached(source);
    fanout.register(&endpoint);
    endpoint
}

#![forbid(unsafe_code)]

//! Tether: synchronous reactive value chains.
//!
//! # Role
//! `tether-core` builds directed graphs of value producers, transformation
//! stages and consumers. A value pushed at a producer runs synchronously
//! through every live chain on the calling thread; a chain rooted at a
//! producer with a current value can also pull ("sync") it on demand.
//!
//! # Primary pieces
//! - **Producers**: [`ManualProducer`] (push only), [`PullProducer`]
//!   (computed on demand), [`StatefulProducer`] (stores a value, propagates
//!   changes).
//! - **[`Builder`]**: composition operators (`to`, `guard`, `normalize`,
//!   `merge`, `pair`, `combine`, `delay`, `debounce`, ...).
//! - **[`Terminal`]**: the strong owner of a finished chain.
//! - **[`Consumer`] / [`Output`]**: independently owned sinks reached through
//!   weak proxies.
//!
//! # Ownership
//! Producers hold their endpoints weakly, stages forward weakly, and the
//! terminal handle is the one strong owner. Dropping it tears the chain down
//! at once; nothing has to be unsubscribed by hand and no cycle needs
//! breaking.
//!
//! # Concurrency
//! There is no scheduling: pushes and pulls run to completion on the caller's
//! thread. A producer that is already propagating drops any further push or
//! pull, from another thread or from its own callbacks, without blocking.
//!
//! ```
//! use tether_core::StatefulProducer;
//! use std::sync::{Arc, Mutex};
//!
//! let width = StatefulProducer::new(80u16);
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let log = Arc::clone(&seen);
//! let chain = width
//!     .begin()
//!     .guard(|w| *w >= 40)
//!     .to(|w| w / 2)
//!     .sink(move |half| log.lock().unwrap().push(half));
//!
//! chain.sync();
//! width.set_value(100);
//! width.set_value(100);
//! width.set_value(20);
//! assert_eq!(*seen.lock().unwrap(), vec![40, 50]);
//! ```

pub mod builder;
pub mod consumer;
pub mod endpoint;
pub mod error;
mod fanout;
pub mod guard;
pub mod mode;
pub mod producer;
pub mod schedule;
pub mod slot;
pub mod terminal;

pub use builder::{Builder, Paired};
pub use consumer::{Consumer, Output, Receivers};
pub use endpoint::{Endpoint, EndpointId};
pub use error::ChainError;
pub use mode::{Mode, PushOnly, Syncable};
pub use producer::{ManualProducer, PullProducer, StatefulProducer};
pub use schedule::{Callback, Scheduler, TaskHandle};
pub use terminal::Terminal;

#[cfg(any(test, feature = "test-helpers"))]
pub use schedule::ManualScheduler;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock, recovering the guard from a poisoned mutex. No stage runs while an
/// engine lock is held.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#![forbid(unsafe_code)]

//! Delayed-call collaborator contract.
//!
//! Time-buffering stages ([`Builder::delay`](crate::Builder::delay),
//! [`Builder::debounce`](crate::Builder::debounce)) hand closures to a
//! [`Scheduler`] and let it call back later, on whatever thread it likes.
//! The callback re-enters the chain exactly like a fresh push would.
//!
//! Contract for implementors:
//!
//! 1. A scheduled callback runs at least once after `delay` has elapsed
//!    (repeatedly, every `delay`, when `repeats` is set).
//! 2. `cancel` before the callback fires prevents it from running.
//! 3. Neither `schedule` nor `cancel` invokes a callback synchronously.
//!
//! `tether-runtime` provides a threaded implementation. With the
//! `test-helpers` feature this module also exports [`ManualScheduler`], a
//! deterministic virtual-clock scheduler.

use std::fmt;
use std::time::Duration;

/// Work handed to a [`Scheduler`].
pub type Callback = Box<dyn FnMut() + Send + 'static>;

/// Identifies one scheduled callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskHandle(u64);

impl TaskHandle {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Runs callbacks after a delay.
pub trait Scheduler: Send + Sync {
    /// Run `callback` once after `delay`, or every `delay` if `repeats`.
    fn schedule(&self, delay: Duration, repeats: bool, callback: Callback) -> TaskHandle;

    /// Stop `handle` from firing (again). Unknown handles are ignored.
    fn cancel(&self, handle: TaskHandle);
}

#[cfg(any(test, feature = "test-helpers"))]
pub use manual::ManualScheduler;

#[cfg(any(test, feature = "test-helpers"))]
mod manual {
    use std::collections::BTreeMap;
    use std::fmt;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::{Callback, Scheduler, TaskHandle};
    use crate::lock;

    /// Repeating tasks never re-arm closer together than this.
    const MIN_INTERVAL: Duration = Duration::from_nanos(1);

    struct Task {
        due: Duration,
        interval: Option<Duration>,
        callback: Callback,
    }

    #[derive(Default)]
    struct ManualState {
        now: Duration,
        next_id: u64,
        tasks: BTreeMap<u64, Task>,
        running: Option<u64>,
        running_cancelled: bool,
    }

    /// Scheduler driven by an explicit virtual clock.
    ///
    /// Nothing fires until [`advance`](Self::advance) moves the clock; due
    /// callbacks then run on the calling thread in due order (ties in
    /// scheduling order).
    #[derive(Default)]
    pub struct ManualScheduler {
        state: Mutex<ManualState>,
    }

    impl fmt::Debug for ManualScheduler {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let state = lock(&self.state);
            f.debug_struct("ManualScheduler")
                .field("now", &state.now)
                .field("pending", &state.tasks.len())
                .finish()
        }
    }

    impl ManualScheduler {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Virtual time elapsed so far.
        #[must_use]
        pub fn now(&self) -> Duration {
            lock(&self.state).now
        }

        /// Callbacks scheduled and not yet fired or cancelled.
        #[must_use]
        pub fn pending(&self) -> usize {
            lock(&self.state).tasks.len()
        }

        /// Move the clock forward by `by`, firing every callback that comes
        /// due. Returns how many callbacks ran.
        pub fn advance(&self, by: Duration) -> usize {
            let target = lock(&self.state).now.saturating_add(by);
            let mut fired = 0;
            loop {
                let (id, mut task) = {
                    let mut state = lock(&self.state);
                    let next = state
                        .tasks
                        .iter()
                        .filter(|(_, task)| task.due <= target)
                        .min_by_key(|(id, task)| (task.due, **id))
                        .map(|(id, _)| *id);
                    let Some(id) = next else {
                        state.now = target;
                        return fired;
                    };
                    let Some(task) = state.tasks.remove(&id) else {
                        state.now = target;
                        return fired;
                    };
                    state.now = task.due;
                    state.running = Some(id);
                    state.running_cancelled = false;
                    (id, task)
                };

                (task.callback)();
                fired += 1;

                let mut state = lock(&self.state);
                let cancelled = state.running_cancelled;
                state.running = None;
                // A repeat whose next due time overflows the clock is retired.
                let next = task.interval.and_then(|interval| task.due.checked_add(interval));
                if let (Some(next), false) = (next, cancelled) {
                    task.due = next;
                    state.tasks.insert(id, task);
                }
            }
        }
    }

    impl Scheduler for ManualScheduler {
        fn schedule(&self, delay: Duration, repeats: bool, callback: Callback) -> TaskHandle {
            let mut state = lock(&self.state);
            let id = state.next_id;
            state.next_id += 1;
            let due = state.now.saturating_add(delay);
            state.tasks.insert(
                id,
                Task {
                    due,
                    interval: repeats.then(|| delay.max(MIN_INTERVAL)),
                    callback,
                },
            );
            TaskHandle::new(id)
        }

        fn cancel(&self, handle: TaskHandle) {
            let mut state = lock(&self.state);
            if state.tasks.remove(&handle.get()).is_none() && state.running == Some(handle.get())
            {
                state.running_cancelled = true;
            }
        }
    }
}

#![forbid(unsafe_code)]

//! Non-blocking propagation flag.
//!
//! A producer holds one [`PropagationFlag`] and wraps every push or pull in
//! [`PropagationFlag::try_acquire`]. A caller that finds the flag taken does
//! not wait and does not queue: its propagation is dropped. That covers both
//! a second thread racing the first and a callback re-entering its own
//! producer.

use std::sync::atomic::{AtomicBool, Ordering};

/// Single-owner busy flag with compare-and-swap acquire.
#[derive(Debug, Default)]
pub struct PropagationFlag {
    busy: AtomicBool,
}

impl PropagationFlag {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
        }
    }

    /// Take the flag if nobody holds it.
    #[must_use]
    pub fn try_acquire(&self) -> Option<PropagationGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| PropagationGuard { flag: self })
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the flag on drop, including during unwinding.
#[derive(Debug)]
pub struct PropagationGuard<'a> {
    flag: &'a PropagationFlag,
}

impl Drop for PropagationGuard<'_> {
    fn drop(&mut self) {
        self.flag.busy.store(false, Ordering::Release);
    }
}

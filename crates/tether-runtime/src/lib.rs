#![forbid(unsafe_code)]

//! Runtime support for tether chains.
//!
//! `tether-core` never starts threads. Stages that buffer values in time
//! (`delay`, `debounce`) need a [`Scheduler`](tether_core::Scheduler); this
//! crate provides [`TimerThread`], which runs scheduled callbacks on one
//! dedicated background thread.

pub mod timer_thread;

pub use timer_thread::{TimerConfig, TimerError, TimerThread};

#![forbid(unsafe_code)]

//! Type-level pull capability.
//!
//! A chain rooted at a producer that can report its current value carries
//! [`Syncable`]; one rooted at a push-only producer carries [`PushOnly`].
//! `sync()` is only defined for the former, so asking a manual producer for
//! its "current value" is a compile error rather than a silent no-op.

mod sealed {
    pub trait Sealed {}
}

/// Marker implemented by [`PushOnly`] and [`Syncable`].
pub trait Mode: sealed::Sealed + 'static {}

/// Chains rooted at a producer with no current value.
#[derive(Debug)]
pub enum PushOnly {}

/// Chains rooted at a producer that can re-deliver its current value.
#[derive(Debug)]
pub enum Syncable {}

impl sealed::Sealed for PushOnly {}
impl sealed::Sealed for Syncable {}
impl Mode for PushOnly {}
impl Mode for Syncable {}

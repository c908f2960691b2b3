#![forbid(unsafe_code)]

//! Programming errors raised while building or driving a chain.
//!
//! Nothing in here describes an *expected* non-delivery (a guard rejecting a
//! value, a pull source with nothing to report, a combine still waiting for
//! its second side, a push lost to contention). Those stay silent.
//! A `ChainError` always means the graph itself is malformed.

use std::fmt;

use crate::endpoint::EndpointId;

/// A malformed-graph error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// A value was delivered to a slot that has no stage installed. The chain
    /// was never terminated with `end()` or a sink.
    MissingStage { endpoint: EndpointId, index: usize },
    /// The stage in a slot accepts a different value type than the one
    /// delivered to it.
    StageTypeMismatch {
        endpoint: EndpointId,
        index: usize,
        expected: &'static str,
        found: &'static str,
    },
    /// A stage was installed into an endpoint that has already been sealed.
    Sealed { endpoint: EndpointId },
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingStage { endpoint, index } => {
                write!(f, "no stage installed at {endpoint}[{index}]")
            }
            Self::StageTypeMismatch {
                endpoint,
                index,
                expected,
                found,
            } => write!(
                f,
                "stage {endpoint}[{index}] accepts `{found}`, delivered `{expected}`"
            ),
            Self::Sealed { endpoint } => write!(f, "{endpoint} is sealed"),
        }
    }
}

impl std::error::Error for ChainError {}

//! Error types for the simulator.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while configuring or running a simulation.
///
/// Packet loss is not an error: collisions that exhaust the retry budget and
/// queue overflows are recorded in the flow statistics instead.
#[derive(Debug, Error)]
pub enum SimError {
    /// Configuration rejected before the first event was scheduled.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// An event was requested at an absolute time earlier than the clock.
    #[error("Cannot schedule event at {at:?}, clock is already at {now:?}")]
    InvalidSchedule { at: Duration, now: Duration },

    /// Report or trace output failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Report serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;

impl SimError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        SimError::InvalidConfiguration(msg.into())
    }
}

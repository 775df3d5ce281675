use std::time::Duration;

use thiserror::Error;

/// Failures talking to the message broker.
///
/// None of these are retried inside this crate; publishers react by
/// dead-lettering the event.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Broker unreachable at {endpoint}: {cause}")]
    Unreachable { endpoint: String, cause: String },

    #[error("Broker connection closed and automatic recovery is disabled")]
    Closed,

    #[error("Connection manager has been shut down")]
    Disposed,

    #[error("Broker operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Topology declaration failed: {0}")]
    Topology(String),
}

impl From<lapin::Error> for ConnectionError {
    fn from(e: lapin::Error) -> Self {
        ConnectionError::Channel(e.to_string())
    }
}

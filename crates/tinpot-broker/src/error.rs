//! Broker adapter errors.
//!
//! All variants implement [`ErrorCode`] with the `BROKER_` prefix.

use thiserror::Error;
use tinpot_protocol::ErrorCode;

/// Broker adapter error.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker URL could not be parsed.
    #[error("invalid broker url: {0}")]
    InvalidUrl(String),

    /// The request could not be handed to the client.
    ///
    /// Covers a full request queue and a closed client alike.
    #[error("broker request failed: {0}")]
    Request(String),

    /// The broker did not acknowledge within the ack deadline.
    #[error("broker ack timed out for {0}")]
    AckTimeout(&'static str),

    /// The connection dropped while an acknowledgment was pending.
    #[error("broker connection lost")]
    ConnectionLost,
}

impl ErrorCode for BrokerError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidUrl(_) => "BROKER_INVALID_URL",
            Self::Request(_) => "BROKER_REQUEST_FAILED",
            Self::AckTimeout(_) => "BROKER_ACK_TIMEOUT",
            Self::ConnectionLost => "BROKER_CONNECTION_LOST",
        }
    }

    fn is_recoverable(&self) -> bool {
        // Everything except a bad URL is transient: the driver task
        // reconnects and the operation can be retried.
        !matches!(self, Self::InvalidUrl(_))
    }
}

//! Error types for broker operations

use confer_core::{Error as CoreError, ErrorCode, Nack};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("No consumer registered on queue {queue}")]
    NoConsumer { queue: &'static str },

    #[error("Queue {queue} already has a consumer")]
    AlreadyRegistered { queue: &'static str },

    #[error("Request on queue {queue} timed out after {timeout:?}")]
    Timeout {
        queue: &'static str,
        timeout: Duration,
    },

    #[error("Request on queue {queue} was nacked: {nack}")]
    Nacked { queue: &'static str, nack: Nack },

    /// The request/response contract was broken on either side
    #[error("Protocol violation on queue {queue}: {reason}")]
    ProtocolViolation { queue: &'static str, reason: String },
}

impl BrokerError {
    #[must_use]
    pub const fn queue(&self) -> &'static str {
        match self {
            Self::NoConsumer { queue }
            | Self::AlreadyRegistered { queue }
            | Self::Timeout { queue, .. }
            | Self::Nacked { queue, .. }
            | Self::ProtocolViolation { queue, .. } => queue,
        }
    }

    /// The nack returned by the consumer, if the request got that far
    #[must_use]
    pub const fn nack(&self) -> Option<&Nack> {
        match self {
            Self::Nacked { nack, .. } => Some(nack),
            _ => None,
        }
    }

    /// The consumer never answered in time; it may still have acted
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Code of the failure as seen by the sender; matches the `CoreError` conversion
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Nacked { nack, .. } => nack.code,
            Self::ProtocolViolation { .. } | Self::AlreadyRegistered { .. } => {
                ErrorCode::ProtocolViolation
            }
            Self::NoConsumer { .. } | Self::Timeout { .. } => ErrorCode::UpstreamRejected,
        }
    }

    /// Classify a failed downstream request from the point of view of the
    /// party that issued it: anything short of a contract breach is an
    /// upstream rejection the original caller may retry.
    #[must_use]
    pub fn into_upstream(self) -> CoreError {
        match self {
            Self::ProtocolViolation { .. } => CoreError::ProtocolViolation(self.to_string()),
            other => CoreError::UpstreamRejected(other.to_string()),
        }
    }
}

impl From<BrokerError> for CoreError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Nacked { nack, .. } => nack.into(),
            BrokerError::ProtocolViolation { .. } | BrokerError::AlreadyRegistered { .. } => {
                Self::ProtocolViolation(err.to_string())
            }
            BrokerError::NoConsumer { .. } | BrokerError::Timeout { .. } => {
                Self::UpstreamRejected(err.to_string())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;

//! Error types for the signaling gateway

use confer_broker::BrokerError;
use confer_core::{ErrorCode, SpaceId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Connection not found: {0}")]
    UnknownConnection(String),

    #[error("Connection {0} has not joined its space")]
    NotJoined(String),

    #[error("Space {space_id} is at capacity ({limit} connections)")]
    SpaceFull { space_id: SpaceId, limit: usize },

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl GatewayError {
    /// Stable code exposed to clients
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownConnection(_) => ErrorCode::NotFound,
            Self::NotJoined(_) | Self::SpaceFull { .. } => ErrorCode::Conflict,
            Self::Broker(err) => err.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use confer_core::Nack;
    use std::time::Duration;

    #[test]
    fn test_codes() {
        assert_eq!(
            GatewayError::UnknownConnection("c".into()).code(),
            ErrorCode::NotFound
        );
        assert_eq!(
            GatewayError::SpaceFull {
                space_id: SpaceId::from("room"),
                limit: 2
            }
            .code(),
            ErrorCode::Conflict
        );

        let nacked = GatewayError::from(BrokerError::Nacked {
            queue: "addMember",
            nack: Nack::not_found("space gone"),
        });
        assert_eq!(nacked.code(), ErrorCode::NotFound);

        let timed_out = GatewayError::from(BrokerError::Timeout {
            queue: "addMember",
            timeout: Duration::from_secs(1),
        });
        assert_eq!(timed_out.code(), ErrorCode::UpstreamRejected);
    }
}

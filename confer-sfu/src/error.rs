//! Worker error types

use confer_broker::BrokerError;
use confer_core::{Nack, RouterId, TransportId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SfuError {
    #[error("Router {0} already exists")]
    DuplicateRouter(RouterId),

    #[error("Router {0} not found")]
    RouterNotFound(RouterId),

    #[error("Router limit of {0} reached")]
    RouterLimit(usize),

    #[error("Transport {0} already exists")]
    DuplicateTransport(TransportId),

    #[error("Transport {0} not found")]
    TransportNotFound(TransportId),

    #[error("No free RTC port left")]
    PortsExhausted,

    #[error("Coordinator did not accept transport update: {0}")]
    UpdateRejected(#[from] BrokerError),
}

impl From<SfuError> for Nack {
    fn from(err: SfuError) -> Self {
        let message = err.to_string();
        match err {
            SfuError::DuplicateRouter(_) | SfuError::DuplicateTransport(_) => {
                Self::conflict(message)
            }
            SfuError::RouterNotFound(_) | SfuError::TransportNotFound(_) => {
                Self::not_found(message)
            }
            SfuError::RouterLimit(_) | SfuError::PortsExhausted | SfuError::UpdateRejected(_) => {
                Self::upstream_rejected(message)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, SfuError>;

#[cfg(test)]
mod tests {
    use super::*;
    use confer_core::ErrorCode;

    #[test]
    fn test_nack_codes() {
        let nack = Nack::from(SfuError::DuplicateRouter(RouterId::new(1)));
        assert_eq!(nack.code, ErrorCode::Conflict);

        let nack = Nack::from(SfuError::PortsExhausted);
        assert_eq!(nack.code, ErrorCode::UpstreamRejected);
        assert!(nack.retryable);

        let nack = Nack::from(SfuError::TransportNotFound(TransportId::new(3)));
        assert_eq!(nack.code, ErrorCode::NotFound);
        assert!(!nack.retryable);
    }
}

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// A downstream broker request was nacked or never answered
    #[error("Upstream rejected: {0}")]
    UpstreamRejected(String),

    /// A collaborator broke the request/response contract
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Identifier collision: {kind} {id} is still live")]
    IdCollision { kind: &'static str, id: u64 },
}

impl Error {
    /// Stable code sent to remote callers in place of the message text
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::UpstreamRejected(_) => ErrorCode::UpstreamRejected,
            Self::ProtocolViolation(_) | Self::IdCollision { .. } => ErrorCode::ProtocolViolation,
            Self::InvalidInput(_) => ErrorCode::InvalidInput,
        }
    }

    /// Whether the caller may retry the same request unchanged
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamRejected(_))
    }
}

/// Wire-level error code carried by a [`Nack`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    Conflict,
    UpstreamRejected,
    ProtocolViolation,
    InvalidInput,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::UpstreamRejected => "upstream_rejected",
            Self::ProtocolViolation => "protocol_violation",
            Self::InvalidInput => "invalid_input",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Negative acknowledgement of a broker request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("{code}: {message}")]
pub struct Nack {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
}

impl Nack {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: code == ErrorCode::UpstreamRejected,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn upstream_rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UpstreamRejected, message)
    }

    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProtocolViolation, message)
    }
}

impl From<Error> for Nack {
    fn from(err: Error) -> Self {
        Self {
            code: err.code(),
            retryable: err.is_retryable(),
            message: err.to_string(),
        }
    }
}

impl From<Nack> for Error {
    fn from(nack: Nack) -> Self {
        match nack.code {
            ErrorCode::NotFound => Self::NotFound(nack.message),
            ErrorCode::Conflict => Self::Conflict(nack.message),
            ErrorCode::UpstreamRejected => Self::UpstreamRejected(nack.message),
            ErrorCode::ProtocolViolation => Self::ProtocolViolation(nack.message),
            ErrorCode::InvalidInput => Self::InvalidInput(nack.message),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_upstream_rejections_are_retryable() {
        assert!(Error::UpstreamRejected("worker down".into()).is_retryable());
        assert!(!Error::NotFound("space".into()).is_retryable());
        assert!(!Error::Conflict("space still not empty".into()).is_retryable());

        let nack = Nack::from(Error::UpstreamRejected("worker down".into()));
        assert_eq!(nack.code, ErrorCode::UpstreamRejected);
        assert!(nack.retryable);
    }

    #[test]
    fn test_id_collision_maps_to_protocol_violation() {
        let err = Error::IdCollision { kind: "member", id: 3 };
        assert_eq!(err.code(), ErrorCode::ProtocolViolation);
    }

    #[test]
    fn test_nack_wire_shape() {
        let nack = Nack::conflict("space still not empty");
        let value = serde_json::to_value(&nack).unwrap();
        assert_eq!(value["code"], "conflict");
        assert_eq!(value["retryable"], false);
        assert_eq!(value["message"], "space still not empty");
    }
}

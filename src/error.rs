use thiserror::Error;

use crate::class::ClassStatus;

/// Error types for the live session engine
#[derive(Debug, Error)]
pub enum SessionError {
    /// Join / relay rejections
    #[error("Room {0} is not live yet")]
    RoomNotLive(String),

    #[error("Room {room_id} is full ({max} participants)")]
    RoomFull { room_id: String, max: usize },

    #[error("Room {0} is closed")]
    RoomClosed(String),

    #[error("Room {0} not found")]
    RoomNotFound(String),

    #[error("Participant {0} is not joined to this room")]
    UnknownParticipant(String),

    #[error("Connection {0} not authorized for this operation")]
    Unauthorized(String),

    /// Lifecycle errors
    #[error("Class {class_id} expected {expected:?} but found {found:?}")]
    StaleTransition {
        class_id: String,
        expected: ClassStatus,
        found: ClassStatus,
    },

    #[error("Class {0} not found")]
    ClassNotFound(String),

    /// Persistence errors
    #[error("Class store unavailable: {0}")]
    StoreUnavailable(String),

    /// Message errors
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Failed to serialize message: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results using SessionError
pub type Result<T> = std::result::Result<T, SessionError>;

impl SessionError {
    pub fn internal(msg: impl Into<String>) -> Self {
        SessionError::Internal(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        SessionError::StoreUnavailable(msg.into())
    }

    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::StoreUnavailable(_))
    }

    /// Stable reason code sent to clients alongside the message
    pub fn rejection_code(&self) -> &'static str {
        match self {
            SessionError::RoomNotLive(_) => "not-yet-live",
            SessionError::RoomFull { .. } => "room-full",
            SessionError::RoomClosed(_) => "closed",
            SessionError::RoomNotFound(_) | SessionError::ClassNotFound(_) => "not-found",
            SessionError::UnknownParticipant(_) => "unknown-participant",
            SessionError::Unauthorized(_) => "unauthorized",
            SessionError::StoreUnavailable(_) => "unavailable",
            SessionError::InvalidMessage(_) | SessionError::SerializationFailed(_) => {
                "invalid-message"
            }
            SessionError::StaleTransition { .. }
            | SessionError::InvalidConfiguration(_)
            | SessionError::Internal(_) => "internal",
        }
    }
}

//! Centralized error types for Huddle.
//!
//! Every failure a client can cause maps to a stable error code and a numeric
//! transport code. The gateway turns these into in-band `error` events; only
//! authentication failures ever close a connection.

/// Core error type used across all Huddle services.
#[derive(Debug, thiserror::Error)]
pub enum HuddleError {
    // === Auth errors ===
    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Unauthorized")]
    Unauthorized,

    // === Resource errors ===
    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("User {user_id} is not connected")]
    NotConnected { user_id: i64 },

    #[error("Connection {connection_id} is already registered")]
    DuplicateConnection { connection_id: String },

    // === Validation errors ===
    #[error("Validation failed: {message}")]
    Validation { message: String },

    // === Infrastructure errors ===
    #[error("Database error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl HuddleError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Error code string for programmatic handling by clients.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidToken => "INVALID_TOKEN",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::NotConnected { .. } => "NOT_CONNECTED",
            Self::DuplicateConnection { .. } => "DUPLICATE_CONNECTION",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Persistence(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Numeric code used for WebSocket close frames and in-band error events.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::InvalidToken => 4001,
            Self::TokenExpired => 4002,
            Self::Unauthorized => 4003,
            Self::NotFound { .. } | Self::NotConnected { .. } => 4404,
            Self::DuplicateConnection { .. } => 4409,
            Self::Validation { .. } => 4400,
            Self::Persistence(_) | Self::Internal(_) => 5000,
        }
    }

    /// Message safe to show a client. Internal details are logged, not sent.
    pub fn client_message(&self) -> String {
        match self {
            Self::Persistence(e) => {
                tracing::error!("Database error: {e}");
                "An internal error occurred".to_string()
            }
            Self::Internal(e) => {
                tracing::error!("Internal error: {e}");
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Convenience type alias for Results using HuddleError.
pub type HuddleResult<T> = Result<T, HuddleError>;

use thiserror::Error;

/// Failures decoding an opaque pagination cursor. Every variant carries the
/// cursor exactly as the caller sent it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CursorError {
    #[error("cursor {cursor:?} is not valid base64")]
    InvalidBase64 { cursor: String },

    #[error("cursor {cursor:?} does not decode to UTF-8 text")]
    InvalidUtf8 { cursor: String },

    #[error("cursor {cursor:?} has an unexpected payload: {reason}")]
    InvalidPayload { cursor: String, reason: String },

    #[error("cursor {cursor:?} carries an invalid timestamp {value:?}")]
    InvalidTime { cursor: String, value: String },

    #[error("cursor {cursor:?} does not reference a telemetry row")]
    InvalidIdentifier { cursor: String },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("invalid cursor: {0}")]
    Cursor(#[from] CursorError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("Channel send error")]
    ChannelSend,
}

impl Error {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// True for failures caused by the caller's input rather than by the
    /// service or its collaborators.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Validation { .. }
                | Error::Cursor(_)
                | Error::NotFound(_)
                | Error::Conflict(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

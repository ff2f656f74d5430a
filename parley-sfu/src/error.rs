use thiserror::Error;

/// Errors raised by a media engine call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine rejected request: {0}")]
    Rejected(String),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("unknown engine object: {0}")]
    UnknownObject(String),

    #[error("media worker is not running")]
    Unavailable,
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Failure of one signaling operation
///
/// Surfaced to the client as a structured reply; never closes the connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SfuError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Media engine failure: {0}")]
    EngineFailure(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

impl SfuError {
    /// Code carried in the wire failure object
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::EngineFailure(_) => "EngineFailure",
            Self::Validation(_) => "ValidationFailure",
            Self::PermissionDenied(_) => "PermissionDenied",
        }
    }

    pub(crate) fn not_in_room() -> Self {
        Self::NotFound("session is not in a room".to_string())
    }
}

impl From<EngineError> for SfuError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidParameters(msg) => Self::Validation(msg),
            other => Self::EngineFailure(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SfuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(SfuError::NotFound("x".into()).code(), "NotFound");
        assert_eq!(SfuError::Validation("x".into()).code(), "ValidationFailure");
        assert_eq!(SfuError::PermissionDenied("x".into()).code(), "PermissionDenied");
        assert_eq!(SfuError::EngineFailure("x".into()).code(), "EngineFailure");
    }

    #[test]
    fn test_engine_error_mapping() {
        let err: SfuError = EngineError::InvalidParameters("no opus".into()).into();
        assert_eq!(err, SfuError::Validation("no opus".into()));

        let err: SfuError = EngineError::Unavailable.into();
        assert_eq!(err.code(), "EngineFailure");
    }
}

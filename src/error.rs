use thiserror::Error;

/// Eventing engine error types
#[derive(Error, Debug)]
pub enum EventingError {
    /// Bad input to a registry or publish call; the caller's fault, never retried
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced topic, subscription or delivery is absent where the caller asserted existence
    #[error("Not found: {0}")]
    NotFound(String),

    /// Deletion blocked by existing references
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Payload could not be serialized by the configured codec
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stored payload blob is incompatible with the requested shape
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Storage-layer errors; propagated, never swallowed or auto-retried
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl EventingError {
    /// Get error code string
    pub fn error_code(&self) -> &str {
        match self {
            EventingError::Validation(_) => "VALIDATION_ERROR",
            EventingError::NotFound(_) => "NOT_FOUND",
            EventingError::Conflict(_) => "CONFLICT",
            EventingError::Serialization(_) => "SERIALIZATION_ERROR",
            EventingError::Deserialization(_) => "DESERIALIZATION_ERROR",
            EventingError::Storage(_) => "STORAGE_ERROR",
            EventingError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }
}

/// Conversion from sled::Error
impl From<sled::Error> for EventingError {
    fn from(err: sled::Error) -> Self {
        EventingError::Storage(err.to_string())
    }
}

/// Conversion from validator::ValidationErrors
impl From<validator::ValidationErrors> for EventingError {
    fn from(err: validator::ValidationErrors) -> Self {
        EventingError::Validation(err.to_string())
    }
}

/// Conversion from config::ConfigError
impl From<config::ConfigError> for EventingError {
    fn from(err: config::ConfigError) -> Self {
        EventingError::Configuration(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, EventingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            EventingError::Validation("test".to_string()).error_code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            EventingError::NotFound("test".to_string()).error_code(),
            "NOT_FOUND"
        );
        assert_eq!(
            EventingError::Conflict("test".to_string()).error_code(),
            "CONFLICT"
        );
        assert_eq!(
            EventingError::Deserialization("test".to_string()).error_code(),
            "DESERIALIZATION_ERROR"
        );
    }

    #[test]
    fn test_config_error_conversion() {
        let err: EventingError = config::ConfigError::Message("bad".into()).into();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
    }
}

//! Error types and handling for Trolley
//!
//! This module defines the error types used throughout the controller,
//! providing consistent error handling and reporting.

use thiserror::Error;

/// Result type alias for Trolley operations
pub type Result<T> = std::result::Result<T, TrolleyError>;

/// Main error type for Trolley
#[derive(Debug, Error)]
pub enum TrolleyError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Stored record failed its checksum
    #[error("Checksum error: expected {expected}, found {actual}")]
    Checksum { expected: u32, actual: u32 },

    /// Stored record was written by an incompatible layout
    #[error("Version error: found {found:#010X}, expected {expected:#010X}")]
    Version { found: u32, expected: u32 },

    /// Sensor read errors
    #[error("Sensor error: {message}")]
    Sensor { message: String },

    /// Relay driver errors
    #[error("Relay error: {message}")]
    Relay { message: String },

    /// Schedule decoding errors
    #[error("Schedule error: {message}")]
    Schedule { message: String },

    /// Timeout errors
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl TrolleyError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        TrolleyError::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        TrolleyError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        TrolleyError::Io {
            message: message.into(),
        }
    }

    /// Create a new serialization error
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        TrolleyError::Serialization {
            message: message.into(),
        }
    }

    /// Create a new checksum error
    pub fn checksum(expected: u32, actual: u32) -> Self {
        TrolleyError::Checksum { expected, actual }
    }

    /// Create a new record version error
    pub fn version(found: u32, expected: u32) -> Self {
        TrolleyError::Version { found, expected }
    }

    /// Create a new sensor error
    pub fn sensor<S: Into<String>>(message: S) -> Self {
        TrolleyError::Sensor {
            message: message.into(),
        }
    }

    /// Create a new relay error
    pub fn relay<S: Into<String>>(message: S) -> Self {
        TrolleyError::Relay {
            message: message.into(),
        }
    }

    /// Create a new schedule error
    pub fn schedule<S: Into<String>>(message: S) -> Self {
        TrolleyError::Schedule {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        TrolleyError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        TrolleyError::Generic {
            message: message.into(),
        }
    }

    /// Whether the error means the stored record is unusable and defaults apply
    pub fn is_corrupt_record(&self) -> bool {
        matches!(
            self,
            TrolleyError::Checksum { .. }
                | TrolleyError::Version { .. }
                | TrolleyError::Serialization { .. }
        )
    }
}

impl From<std::io::Error> for TrolleyError {
    fn from(err: std::io::Error) -> Self {
        TrolleyError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for TrolleyError {
    fn from(err: serde_yaml::Error) -> Self {
        TrolleyError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for TrolleyError {
    fn from(err: serde_json::Error) -> Self {
        TrolleyError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<chrono::ParseError> for TrolleyError {
    fn from(err: chrono::ParseError) -> Self {
        TrolleyError::validation("datetime".to_string(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = TrolleyError::config("test config error");
        assert!(matches!(err, TrolleyError::Config { .. }));

        let err = TrolleyError::sensor("test sensor error");
        assert!(matches!(err, TrolleyError::Sensor { .. }));

        let err = TrolleyError::validation("field", "test validation error");
        assert!(matches!(err, TrolleyError::Validation { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = TrolleyError::config("test error");
        let error_string = format!("{}", err);
        assert_eq!(error_string, "Configuration error: test error");

        let err = TrolleyError::validation("test_field", "invalid value");
        let error_string = format!("{}", err);
        assert_eq!(error_string, "Validation error: test_field - invalid value");

        let err = TrolleyError::version(0x1234, 0x99DE_A128);
        assert_eq!(
            format!("{}", err),
            "Version error: found 0x00001234, expected 0x99DEA128"
        );
    }

    #[test]
    fn test_corrupt_record_classification() {
        assert!(TrolleyError::checksum(1, 2).is_corrupt_record());
        assert!(TrolleyError::version(1, 2).is_corrupt_record());
        assert!(!TrolleyError::io("disk gone").is_corrupt_record());
    }
}

//! Error types and handling for Helion
//!
//! This module defines the error types used throughout the application,
//! providing consistent error handling and reporting.

use thiserror::Error;

/// Result type alias for Helion operations
pub type Result<T> = std::result::Result<T, HelionError>;

/// Main error type for Helion
#[derive(Debug, Error)]
pub enum HelionError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Message-bus errors
    #[error("MQTT error: {message}")]
    Mqtt { message: String },

    /// Station session errors
    #[error("Session error: {message}")]
    Session { message: String },

    /// HTTP/Web server errors
    #[error("Web server error: {message}")]
    Web { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Network-related errors
    #[error("Network error: {message}")]
    Network { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl HelionError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        HelionError::Config {
            message: message.into(),
        }
    }

    /// Create a new MQTT error
    pub fn mqtt<S: Into<String>>(message: S) -> Self {
        HelionError::Mqtt {
            message: message.into(),
        }
    }

    /// Create a new session error
    pub fn session<S: Into<String>>(message: S) -> Self {
        HelionError::Session {
            message: message.into(),
        }
    }

    /// Create a new web error
    pub fn web<S: Into<String>>(message: S) -> Self {
        HelionError::Web {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        HelionError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        HelionError::Io {
            message: message.into(),
        }
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        HelionError::Network {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        HelionError::Generic {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for HelionError {
    fn from(err: std::io::Error) -> Self {
        HelionError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for HelionError {
    fn from(err: serde_yaml::Error) -> Self {
        HelionError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for HelionError {
    fn from(err: serde_json::Error) -> Self {
        HelionError::Serialization {
            message: err.to_string(),
        }
    }
}

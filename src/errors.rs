// SPDX-License-Identifier: MPL-2.0

//! Error types for the camera session

use crate::backends::camera::BackendError;
use std::fmt;

/// Result type alias using SessionError
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors returned by session operations
///
/// Guard failures never change session state: an `Err` always means the call
/// had no side effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Bad caller input (missing render target, device index out of range,
    /// zero resolution)
    InvalidArgument(String),
    /// The resource the operation needs (monitor, pipeline, connection) is not
    /// present in the current state
    NotReady(&'static str),
    /// Recording already in progress
    RecordingInProgress,
    /// No recording in progress
    NoRecordingInProgress,
    /// A backend adapter failed
    Backend(BackendError),
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read
    Io(std::io::Error),
    /// The file is not valid configuration JSON
    Parse(serde_json::Error),
    /// No per-user configuration directory on this system
    NoConfigDir,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            SessionError::NotReady(what) => write!(f, "Not ready: {}", what),
            SessionError::RecordingInProgress => write!(f, "Recording already in progress"),
            SessionError::NoRecordingInProgress => write!(f, "No recording in progress"),
            SessionError::Backend(e) => write!(f, "Backend error: {}", e),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read configuration: {}", e),
            ConfigError::Parse(e) => write!(f, "Invalid configuration: {}", e),
            ConfigError::NoConfigDir => write!(f, "No configuration directory available"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Backend(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::NoConfigDir => None,
        }
    }
}

impl From<BackendError> for SessionError {
    fn from(err: BackendError) -> Self {
        SessionError::Backend(err)
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err)
    }
}

//! Unified error types for Pagewire

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Unified Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Host code reported for an engine-initiated abort (e.g. a superseded navigation).
///
/// Failures carrying this code are never surfaced.
pub const ABORTED_LOAD_CODE: i32 = -3;

/// A page load failure reported by the host engine
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{reason} (code {code}): {description}")]
pub struct NavigationFailure {
    /// Short reason, always "failed to load page" for host-reported failures
    pub reason: String,
    /// Host numeric error code
    pub code: i32,
    /// Host description of the failure
    pub description: String,
}

impl NavigationFailure {
    /// Build a failure from a host `fail-load` report.
    ///
    /// Returns `None` for the filtered abort code.
    pub fn from_fail_load<S: Into<String>>(code: i32, description: S) -> Option<Self> {
        if code == ABORTED_LOAD_CODE {
            return None;
        }
        Some(Self {
            reason: "failed to load page".to_string(),
            code,
            description: description.into(),
        })
    }
}

/// An exception raised by injected script inside the page context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptError {
    /// `Error.message` as reported by the page
    pub message: String,
    /// `Error.name` as reported by the page
    pub name: String,
    /// `Error.stack`, when the page provided one
    pub stack: Option<String>,
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.name, self.message)
        }
    }
}

impl std::error::Error for ScriptError {}

/// Unified error type for Pagewire
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket errors
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// CDP protocol errors
    #[error("CDP error: {0}")]
    Cdp(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Navigation failed
    #[error("Navigation failed: {0}")]
    Navigation(NavigationFailure),

    /// Script raised an exception in the page
    #[error("Script execution failed: {0}")]
    Script(ScriptError),

    /// A wait deadline elapsed
    #[error("Operation timeout: {0}")]
    Timeout(String),

    /// A message could not be built or delivered
    #[error("Transport error: {0}")]
    Transport(String),

    /// The host engine never became ready
    #[error("Host unavailable: {0}")]
    HostUnavailable(String),

    /// The session window is gone
    #[error("Session closed: {0}")]
    SessionClosed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new WebSocket error
    pub fn websocket<S: Into<String>>(msg: S) -> Self {
        Error::WebSocket(msg.into())
    }

    /// Create a new CDP error
    pub fn cdp<S: Into<String>>(msg: S) -> Self {
        Error::Cdp(msg.into())
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Error::Timeout(msg.into())
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Error::Transport(msg.into())
    }

    /// Create a new host unavailable error
    pub fn host_unavailable<S: Into<String>>(msg: S) -> Self {
        Error::HostUnavailable(msg.into())
    }

    /// Create a new session closed error
    pub fn session_closed<S: Into<String>>(id: S) -> Self {
        Error::SessionClosed(id.into())
    }

    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Error::Configuration(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// The navigation failure carried by this error, if any
    pub fn as_navigation_failure(&self) -> Option<&NavigationFailure> {
        match self {
            Error::Navigation(failure) => Some(failure),
            _ => None,
        }
    }

    /// The page exception carried by this error, if any
    pub fn as_script_error(&self) -> Option<&ScriptError> {
        match self {
            Error::Script(err) => Some(err),
            _ => None,
        }
    }
}

impl From<NavigationFailure> for Error {
    fn from(failure: NavigationFailure) -> Self {
        Error::Navigation(failure)
    }
}

impl From<ScriptError> for Error {
    fn from(err: ScriptError) -> Self {
        Error::Script(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aborted_load_is_filtered() {
        assert!(NavigationFailure::from_fail_load(ABORTED_LOAD_CODE, "ERR_ABORTED").is_none());
    }

    #[test]
    fn test_navigation_failure_display() {
        let failure = NavigationFailure::from_fail_load(-105, "ERR_NAME_NOT_RESOLVED").unwrap();
        assert_eq!(failure.reason, "failed to load page");
        assert_eq!(
            Error::from(failure).to_string(),
            "Navigation failed: failed to load page (code -105): ERR_NAME_NOT_RESOLVED"
        );
    }

    #[test]
    fn test_script_error_display() {
        let err = ScriptError {
            message: "x".to_string(),
            name: "Error".to_string(),
            stack: None,
        };
        assert_eq!(err.to_string(), "Error: x");
        assert_eq!(Error::from(err).as_script_error().unwrap().message, "x");
    }
}

//! Error types for GridRunner

use thiserror::Error;

/// Result type alias using GridRunner Error
pub type Result<T> = std::result::Result<T, Error>;

/// GridRunner error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid test unit {unit}: {reason}")]
    Validation { unit: String, reason: String },

    #[error("No {capability} session became available within {waited_ms}ms")]
    Unavailable { capability: String, waited_ms: u64 },

    #[error("Orchestrator is shut down")]
    ShutDown,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures raised by an execution runner while driving a session.
///
/// The retry controller maps these onto the transient / terminal / fatal
/// taxonomy; the runner itself only reports what happened.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    #[error("element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("stale element reference: {selector}")]
    StaleElement { selector: String },

    #[error("wait timed out after {timeout_ms}ms: {selector}")]
    WaitTimeout { selector: String, timeout_ms: u64 },

    #[error("assertion failed: {0}")]
    AssertionFailed(String),

    #[error("browser session lost: {0}")]
    SessionLost(String),

    #[error("transport error: {0}")]
    Transport(String),
}

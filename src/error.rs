//! Error types for Cadence
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in Cadence
#[derive(Debug, Error)]
pub enum CadenceError {
    /// Task identifier was never registered
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    /// OS-level scheduler rejected a submission
    #[error("Submission failed: {0}")]
    Submission(String),

    /// Task-body collaborator returned an error
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// Engine actor is no longer receiving commands
    #[error("Engine stopped")]
    EngineStopped,

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid configuration value
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for Cadence operations
pub type Result<T> = std::result::Result<T, CadenceError>;

//! Error types for caregraph

use thiserror::Error;

/// Result type alias using CareGraphError
pub type Result<T> = std::result::Result<T, CareGraphError>;

/// Error type alias for convenience
pub type Error = CareGraphError;

/// Main error type for caregraph
#[derive(Debug, Error)]
pub enum CareGraphError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A collaborator call (index, embedder, classifier) failed.
    /// Node logic treats this as "no data" rather than aborting the run.
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

//! Unified error type for the engine.
//!
//! Errors fall into three families that callers treat differently:
//!
//! - [`TwinError::Structural`]: the topology itself is invalid (dangling
//!   endpoint, zero or several slack buses, unknown id in an update). Raised
//!   while the network is being built or mutated, never deferred to a solve.
//! - [`TwinError::Usage`]: the request does not make sense for this network
//!   (unknown analysis kind, fault at a bus that does not exist).
//! - [`TwinError::Numerical`]: a numerical routine failed in a way the caller
//!   asked to be raised. Load flow non-convergence and singular matrices are
//!   normally returned as values inside the analysis result instead.
//!
//! The remaining variants wrap input/output and parsing failures from the
//! topology and configuration loaders.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TwinError {
    /// Invalid network topology or element data
    #[error("Structural error: {0}")]
    Structural(String),

    /// Request that cannot be honoured for the given network
    #[error("Usage error: {0}")]
    Usage(String),

    /// Numerical failure (singular matrix, non-finite result)
    #[error("Numerical error: {0}")]
    Numerical(String),

    /// I/O errors while reading topology or configuration files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing/deserialization errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience type alias for Results using TwinError.
pub type TwinResult<T> = Result<T, TwinError>;

impl TwinError {
    /// True for errors that describe the network rather than the request.
    pub fn is_structural(&self) -> bool {
        matches!(self, TwinError::Structural(_))
    }

    /// True for errors caused by the caller's request.
    pub fn is_usage(&self) -> bool {
        matches!(self, TwinError::Usage(_))
    }
}

impl From<serde_json::Error> for TwinError {
    fn from(err: serde_json::Error) -> Self {
        TwinError::Parse(err.to_string())
    }
}

impl From<serde_yaml::Error> for TwinError {
    fn from(err: serde_yaml::Error) -> Self {
        TwinError::Parse(err.to_string())
    }
}

impl From<toml::de::Error> for TwinError {
    fn from(err: toml::de::Error) -> Self {
        TwinError::Parse(err.to_string())
    }
}

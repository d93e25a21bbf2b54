//! Error types for the glyco_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for glyco_core operations
///
/// Domain irregularities (missing ratios, slightly negative pools, ambiguous
/// episodes) are recovered inside the engine and never reach this type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Run window is empty or inverted
    #[error("Invalid run window: {0}")]
    InvalidWindow(String),

    /// Record rejected at the ingestion boundary
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// A default window was requested over a timeline with no entries
    #[error("Timeline is empty")]
    EmptyTimeline,
}

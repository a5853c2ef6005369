//! Error types for the ghostscan engine.
//!
//! Unreachable ports and enrichment fallbacks are not errors and never show up
//! here; only configuration problems and operations that must report failure
//! to their caller (identity check, target resolution) do.

use thiserror::Error;

/// Result type alias using the ghostscan [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid proxy endpoint '{endpoint}': {reason}")]
    InvalidProxy { endpoint: String, reason: String },

    #[error("Invalid port specification: {0}")]
    InvalidPort(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // === Lookup Errors ===
    #[error("Name resolution failed for: {host}")]
    Resolution { host: String },

    #[error("Unexpected response status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Malformed response from {url}: {reason}")]
    MalformedResponse { url: String, reason: String },

    // === Transport Errors ===
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn invalid_proxy(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidProxy {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// True for errors caused by bad configuration values rather than the network.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_)
                | Error::InvalidProxy { .. }
                | Error::InvalidPort(_)
                | Error::InvalidTarget(_)
                | Error::ConfigParse(_)
        )
    }
}

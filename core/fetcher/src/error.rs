//! Error types for the fetcher.
//!
//! Only startup paths (config, logging setup) propagate these to `main`.
//! Everything on the running loop is logged and absorbed.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum FetcherError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file not found (searched: {})", display_paths(.searched))]
    ConfigNotFound { searched: Vec<PathBuf> },

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Missing '{0}' section in config")]
    MissingSection(&'static str),

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Session Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Socket error: {0}")]
    Socket(String),

    #[error("Not connected to the server")]
    NotConnected,

    #[error("Request rejected: {0}")]
    RequestRejected(String),

    #[error("Unsupported address scheme: {0}")]
    UnsupportedScheme(String),
}

/// Convenience type alias for Results using FetcherError.
pub type Result<T> = std::result::Result<T, FetcherError>;

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

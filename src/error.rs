//! Error types for the outreach mailer.

use std::path::PathBuf;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Recipient source error: {0}")]
    Source(#[from] SourceError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Configuration-related errors. Always fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors loading the recipient table.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Recipient source {location} unavailable: {reason}")]
    Unavailable { location: String, reason: String },

    #[error("Recipient table is missing required columns: {}", missing.join(", "))]
    SchemaInvalid { missing: Vec<String> },

    #[error("Failed to parse recipient source {location}: {reason}")]
    Parse { location: String, reason: String },
}

/// Checkpoint persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Failed to read checkpoint {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Checkpoint {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Failed to persist checkpoint {path}: {reason}")]
    Write { path: PathBuf, reason: String },

    #[error("Checkpoint task failed: {0}")]
    Task(String),
}

/// Outbound transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Authentication failed on {host}: {reason}")]
    AuthFailure { host: String, reason: String },

    #[error("Connection to {host} failed: {reason}")]
    ConnectionFailure { host: String, reason: String },

    #[error("Could not build message: {reason}")]
    InvalidMessage { reason: String },

    #[error("Failed to send to {recipient}: {reason}")]
    SendFailure { recipient: String, reason: String },

    #[error("Session already closed")]
    Closed,
}

/// Result type alias for the mailer.
pub type Result<T> = std::result::Result<T, Error>;

//! Error types for a backup run.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Package manifest retrieval failed (transport or remote command).
    #[error("Manifest fetch from {host} failed: {reason}")]
    RemoteFetch { host: String, reason: String },

    /// The snapshot directory or its sidecar files could not be written.
    #[error("Failed to prepare snapshot {}: {source}", path.display())]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Transfer into {} failed: {reason}", destination.display())]
    Transfer { destination: PathBuf, reason: String },

    #[error("Failed to update latest pointer {}: {source}", path.display())]
    Pointer {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Backup root {} is locked by another run", .0.display())]
    Locked(PathBuf),

    #[error("Backup cancelled")]
    Cancelled,
}

/// Deletion of a single expired snapshot failed. Collected, never fatal.
#[derive(Error, Debug)]
#[error("Failed to delete snapshot {name}: {source}")]
pub struct SweepError {
    pub name: String,
    #[source]
    pub source: std::io::Error,
}

pub type Result<T> = std::result::Result<T, BackupError>;

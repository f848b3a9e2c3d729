//! Pull Backup Library
//!
//! Pull-mode incremental backups of a remote host into dated snapshot
//! directories, with a `latest` pointer and age-based retention.

pub mod config;
pub mod daemon;
pub mod executor;
pub mod fs;
pub mod remote;
pub mod snapshot;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::{BackupError, Result, SweepError};

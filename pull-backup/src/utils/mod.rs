//! Utility modules shared by the backup run and the binary.

pub mod errors;
pub mod logger;

pub use errors::{BackupError, Result, SweepError};

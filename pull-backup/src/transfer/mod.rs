//! Snapshot transfer: turns the reference decision into a copy operation.
//!
//! The copy itself is delegated to a [`TreeTransferer`]. Every engine has
//! to honour the same contract: archive-preserving copy of `source` into
//! `destination`, deletions mirrored, and files unchanged relative to
//! `reference` realised as hardlinks to the reference copy.

pub mod local;
pub mod rsync;

use crate::snapshot::{BackupKind, COMPLETION_MARKER_FILE, PACKAGE_LIST_FILE};
use crate::Result;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

pub use local::LocalTreeTransferer;
pub use rsync::RsyncTransferer;

/// Paths never copied, in any mode.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "/dev/*",
    "/proc/*",
    "/sys/*",
    "/tmp/*",
    "/run/*",
    "/mnt/*",
    "/media/*",
    "/lost+found",
];

/// Snapshot sidecars that deletion mirroring must leave alone.
pub const PROTECTED_SIDECARS: &[&str] = &[PACKAGE_LIST_FILE, COMPLETION_MARKER_FILE];

/// How the new snapshot relates to earlier ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferMode {
    Full,
    Incremental { reference: PathBuf },
}

impl TransferMode {
    pub fn kind(&self) -> BackupKind {
        match self {
            TransferMode::Full => BackupKind::Full,
            TransferMode::Incremental { .. } => BackupKind::Incremental,
        }
    }

    pub fn reference(&self) -> Option<&Path> {
        match self {
            TransferMode::Full => None,
            TransferMode::Incremental { reference } => Some(reference),
        }
    }
}

/// One concrete copy operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Engine-specific source locator (`host:/path` for rsync, a local path
    /// for the local engine).
    pub source: String,
    /// Existing snapshot directory to fill.
    pub destination: PathBuf,
    /// Directory to hardlink unchanged files against.
    pub reference: Option<PathBuf>,
    pub excludes: Vec<String>,
    /// Names directly under `destination` that survive deletion mirroring.
    pub protect: Vec<String>,
}

impl TransferRequest {
    /// Build the request for filling `destination` in the given mode.
    ///
    /// When the reference is the destination itself (a second run on the
    /// same day) the tree is updated in place and no link reference is used.
    pub fn for_snapshot(
        source: impl Into<String>,
        destination: impl Into<PathBuf>,
        mode: &TransferMode,
        excludes: &[String],
    ) -> Self {
        let destination = destination.into();
        let reference = mode
            .reference()
            .filter(|reference| *reference != destination.as_path())
            .map(Path::to_path_buf);

        Self {
            source: source.into(),
            destination,
            reference,
            excludes: excludes.to_vec(),
            protect: PROTECTED_SIDECARS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Kind of copy this request performs: incremental only when files
    /// are linked against another snapshot.
    pub fn kind(&self) -> BackupKind {
        if self.reference.is_some() {
            BackupKind::Incremental
        } else {
            BackupKind::Full
        }
    }
}

/// Result of a successful transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Short human-readable summary reported by the engine.
    pub summary: String,
}

/// The copy capability.
#[allow(async_fn_in_trait)]
pub trait TreeTransferer {
    /// Perform the copy. Fails with [`BackupError::Transfer`] on any engine
    /// failure and [`BackupError::Cancelled`] when `cancel` fires.
    ///
    /// [`BackupError::Transfer`]: crate::BackupError::Transfer
    /// [`BackupError::Cancelled`]: crate::BackupError::Cancelled
    async fn transfer(
        &self,
        request: &TransferRequest,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome>;
}

/// Engine selected by configuration.
#[derive(Debug, Clone)]
pub enum TransferEngine {
    Rsync(RsyncTransferer),
    Local(LocalTreeTransferer),
}

impl TreeTransferer for TransferEngine {
    async fn transfer(
        &self,
        request: &TransferRequest,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome> {
        match self {
            TransferEngine::Rsync(engine) => engine.transfer(request, cancel).await,
            TransferEngine::Local(engine) => engine.transfer(request, cancel).await,
        }
    }
}

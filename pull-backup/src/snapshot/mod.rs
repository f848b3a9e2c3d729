//! Dated snapshot directories and the store that holds them.
//!
//! A snapshot is a directory directly under the backup root named after the
//! calendar day it was taken (`YYYY-MM-DD`). Next to the snapshots lives the
//! `latest` link, which names the most recent snapshot that finished its
//! transfer.

pub mod memory;
pub mod store;

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use memory::MemoryStore;
pub use store::{FsStore, SnapshotStore};

/// Date format of snapshot directory names.
pub const SNAPSHOT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Name of the latest pointer at the backup root.
pub const LATEST_POINTER: &str = "latest";

/// Package manifest sidecar inside each snapshot.
pub const PACKAGE_LIST_FILE: &str = "package-list.txt";

/// Written into a snapshot once its transfer succeeded.
pub const COMPLETION_MARKER_FILE: &str = ".snapshot-complete";

/// Parse a directory name as a snapshot date.
///
/// Only exact `YYYY-MM-DD` names qualify: the name must round-trip through
/// the format, so `2025-9-3` or `2025-09-03.old` are not snapshots.
pub fn parse_snapshot_name(name: &str) -> Option<NaiveDate> {
    let date = NaiveDate::parse_from_str(name, SNAPSHOT_DATE_FORMAT).ok()?;
    (snapshot_name(date) == name).then_some(date)
}

pub fn snapshot_name(date: NaiveDate) -> String {
    date.format(SNAPSHOT_DATE_FORMAT).to_string()
}

/// A snapshot directory found under the backup root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub name: String,
    pub date: NaiveDate,
    pub path: PathBuf,
    /// Whether the completion marker is present.
    pub complete: bool,
}

/// How a snapshot was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Full,
    Incremental,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Full => "full",
            BackupKind::Incremental => "incremental",
        }
    }
}

/// Content of the completion marker, serialized as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionMarker {
    pub date: NaiveDate,
    pub kind: BackupKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub host: String,
    pub finished_at: DateTime<Local>,
}

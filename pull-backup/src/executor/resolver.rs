//! Decide whether a new snapshot is full or incremental.

use crate::snapshot::SnapshotStore;
use crate::transfer::TransferMode;
use tracing::{debug, info, warn};

/// Incremental against the latest pointer's target when it is an existing
/// directory, full otherwise. Never fails: a missing, dangling or unreadable
/// pointer just means there is nothing to build on.
pub fn resolve_reference<S: SnapshotStore + ?Sized>(store: &S) -> TransferMode {
    let target = match store.read_pointer() {
        Ok(Some(target)) => target,
        Ok(None) => {
            info!("No latest pointer, first backup is full");
            return TransferMode::Full;
        }
        Err(e) => {
            warn!(pointer = %store.pointer_path().display(), "Cannot read latest pointer, doing a full backup: {}", e);
            return TransferMode::Full;
        }
    };

    if store.is_directory(&target) {
        info!(reference = %target.display(), "Incremental backup");
        TransferMode::Incremental { reference: target }
    } else {
        debug!(target = %target.display(), "Latest pointer is dangling");
        info!("Latest pointer does not lead to a snapshot, doing a full backup");
        TransferMode::Full
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::MemoryStore;
    use std::path::PathBuf;

    #[test]
    fn test_no_pointer_is_full() {
        let store = MemoryStore::new();
        assert_eq!(resolve_reference(&store), TransferMode::Full);
    }

    #[test]
    fn test_valid_pointer_is_incremental() {
        let mut store = MemoryStore::new();
        store.add_directory("2025-09-09");
        store.set_pointer("2025-09-09");

        assert_eq!(
            resolve_reference(&store),
            TransferMode::Incremental {
                reference: PathBuf::from("/backups/2025-09-09")
            }
        );
    }

    #[test]
    fn test_dangling_pointer_is_full() {
        let mut store = MemoryStore::new();
        store.add_directory("2025-09-08");
        store.set_pointer("2025-09-09");
        assert_eq!(resolve_reference(&store), TransferMode::Full);
    }
}

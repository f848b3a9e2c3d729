//! The `latest` pointer.
//!
//! Advancing removes whatever sits at the pointer location and then creates
//! a fresh link. A crash between the two steps leaves no pointer, which the
//! next run reads as "no reference" and answers with a full backup.

use crate::snapshot::SnapshotStore;
use crate::{BackupError, Result};
use tracing::info;

/// Repoint `latest` at snapshot `name`. The caller has confirmed that the
/// snapshot's transfer succeeded.
pub fn advance<S: SnapshotStore + ?Sized>(store: &mut S, name: &str) -> Result<()> {
    let path = store.pointer_path();
    let pointer_error = |source| BackupError::Pointer {
        path: path.clone(),
        source,
    };

    store.remove_pointer().map_err(pointer_error)?;
    store.write_pointer(name).map_err(pointer_error)?;

    info!(pointer = %path.display(), target = name, "Latest pointer advanced");
    Ok(())
}

/// Remove `latest` before a snapshot it targets is rewritten.
pub fn retract<S: SnapshotStore + ?Sized>(store: &mut S) -> Result<()> {
    let path = store.pointer_path();
    store
        .remove_pointer()
        .map_err(|source| BackupError::Pointer {
            path: path.clone(),
            source,
        })?;

    info!(pointer = %path.display(), "Latest pointer retracted until the transfer completes");
    Ok(())
}

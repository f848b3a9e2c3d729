//! In-process transfer engine for sources mounted on the local machine.
//!
//! Mirrors a directory tree into the snapshot the way `rsync -a --delete
//! --link-dest` would: directories and symlinks are recreated, regular files
//! unchanged relative to the reference are hardlinked to it, everything else
//! is copied with its permissions and mtime, and destination entries missing
//! from the source are removed. Ownership, ACLs, xattrs and hardlinks inside
//! the source are not reproduced; use the rsync engine when they matter.

use super::{TransferOutcome, TransferRequest, TreeTransferer};
use crate::fs::{walk_tree, EntryKind, ExcludeSet, FileMetadata};
use crate::{BackupError, Result};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Counters of one mirror pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorStats {
    /// Files written fresh.
    pub copied: u64,
    /// Files hardlinked to the reference.
    pub linked: u64,
    /// Files already up to date in the destination.
    pub unchanged: u64,
    /// Destination entries removed because the source no longer has them.
    pub removed: u64,
    /// Bytes written fresh.
    pub copied_bytes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct LocalTreeTransferer;

impl LocalTreeTransferer {
    pub fn new() -> Self {
        Self
    }
}

impl TreeTransferer for LocalTreeTransferer {
    async fn transfer(
        &self,
        request: &TransferRequest,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome> {
        if cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }

        let destination = request.destination.clone();
        let transfer_error = |reason: String| BackupError::Transfer {
            destination: destination.clone(),
            reason,
        };

        let excludes = ExcludeSet::new(&request.excludes)
            .map_err(|e| transfer_error(format!("invalid exclude pattern: {e}")))?;

        info!(
            source = %request.source,
            destination = %request.destination.display(),
            reference = ?request.reference,
            "Mirroring local tree"
        );

        let request_owned = request.clone();
        let cancel_owned = cancel.clone();
        let result = tokio::task::spawn_blocking(move || {
            mirror_tree(
                Path::new(&request_owned.source),
                &request_owned.destination,
                request_owned.reference.as_deref(),
                &excludes,
                &request_owned.protect,
                &cancel_owned,
            )
        })
        .await
        .map_err(|e| transfer_error(format!("mirror task failed: {e}")))?;

        match result {
            Ok(stats) => {
                info!(
                    copied = stats.copied,
                    linked = stats.linked,
                    unchanged = stats.unchanged,
                    removed = stats.removed,
                    copied_bytes = stats.copied_bytes,
                    "Local mirror complete"
                );
                Ok(TransferOutcome {
                    summary: format!(
                        "{} copied ({} bytes), {} linked, {} unchanged, {} removed",
                        stats.copied, stats.copied_bytes, stats.linked, stats.unchanged, stats.removed
                    ),
                })
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted && cancel.is_cancelled() => {
                Err(BackupError::Cancelled)
            }
            Err(e) => Err(transfer_error(e.to_string())),
        }
    }
}

/// Mirror `source` into `destination`, hardlinking unchanged files against
/// `reference`. Blocking.
pub fn mirror_tree(
    source: &Path,
    destination: &Path,
    reference: Option<&Path>,
    excludes: &ExcludeSet,
    protect: &[String],
    cancel: &CancellationToken,
) -> io::Result<MirrorStats> {
    if !fs::metadata(source)?.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("source {} is not a directory", source.display()),
        ));
    }
    fs::create_dir_all(destination)?;

    let mut stats = MirrorStats::default();
    let mut seen = HashSet::new();
    let mut directories = Vec::new();

    for entry in walk_tree(source, excludes)? {
        if cancel.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "transfer cancelled"));
        }

        let target = destination.join(&entry.relative_path);
        match entry.kind {
            EntryKind::Dir => {
                ensure_directory(&target)?;
                directories.push((entry.path.clone(), target));
            }
            EntryKind::Symlink => mirror_symlink(&entry.path, &target)?,
            EntryKind::File => {
                let reference_file = reference.map(|r| r.join(&entry.relative_path));
                mirror_file(&entry.path, &target, reference_file.as_deref(), &mut stats)?;
            }
            EntryKind::Special => {
                debug!(path = %entry.path.display(), "Skipping special file");
                continue;
            }
        }
        seen.insert(entry.relative_path);
    }

    prune_extraneous(destination, Path::new(""), &seen, excludes, protect, &mut stats)?;

    // Modes last, so read-only directories do not block writing their contents.
    for (source_dir, target_dir) in directories.iter().rev() {
        FileMetadata::from_path(source_dir)?.apply_permissions(target_dir)?;
    }

    Ok(stats)
}

fn mirror_file(
    source: &Path,
    target: &Path,
    reference: Option<&Path>,
    stats: &mut MirrorStats,
) -> io::Result<()> {
    let metadata = FileMetadata::from_path(source)?;

    if let Some(existing) = regular_file_metadata(target)? {
        if existing.unchanged_from(&metadata) {
            stats.unchanged += 1;
            return Ok(());
        }
    }

    remove_existing(target)?;

    if let Some(reference) = reference {
        if let Some(previous) = regular_file_metadata(reference)? {
            if previous.unchanged_from(&metadata) {
                fs::hard_link(reference, target)?;
                stats.linked += 1;
                return Ok(());
            }
        }
    }

    copy_file(source, target, &metadata)?;
    stats.copied += 1;
    stats.copied_bytes += metadata.size;
    Ok(())
}

/// Fresh copy with mode and mtime. The target must not exist; writing into
/// an existing file could write through a hardlink into an older snapshot.
fn copy_file(source: &Path, target: &Path, metadata: &FileMetadata) -> io::Result<()> {
    let mut reader = File::open(source)?;
    let mut writer = File::options().write(true).create_new(true).open(target)?;
    io::copy(&mut reader, &mut writer)?;
    writer.set_modified(metadata.modified_time())?;
    drop(writer);
    metadata.apply_permissions(target)
}

#[cfg(unix)]
fn mirror_symlink(source: &Path, target: &Path) -> io::Result<()> {
    let link_target = fs::read_link(source)?;
    if let Ok(existing) = fs::read_link(target) {
        if existing == link_target {
            return Ok(());
        }
    }
    remove_existing(target)?;
    std::os::unix::fs::symlink(link_target, target)
}

#[cfg(not(unix))]
fn mirror_symlink(source: &Path, _target: &Path) -> io::Result<()> {
    debug!(path = %source.display(), "Skipping symlink on this platform");
    Ok(())
}

fn ensure_directory(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => {
            fs::remove_file(path)?;
            fs::create_dir(path)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir(path),
        Err(e) => Err(e),
    }
}

/// Metadata of `path` if it is a regular file (links not followed).
fn regular_file_metadata(path: &Path) -> io::Result<Option<FileMetadata>> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_file() => Ok(Some(FileMetadata::from_metadata(&meta))),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn remove_existing(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Remove destination entries the source no longer has. Excluded paths and
/// protected names at the top level are left alone.
fn prune_extraneous(
    destination: &Path,
    relative: &Path,
    keep: &HashSet<PathBuf>,
    excludes: &ExcludeSet,
    protect: &[String],
    stats: &mut MirrorStats,
) -> io::Result<()> {
    for entry in fs::read_dir(destination.join(relative))? {
        let entry = entry?;
        let child = relative.join(entry.file_name());

        if relative.as_os_str().is_empty()
            && protect.iter().any(|name| entry.file_name() == name.as_str())
        {
            continue;
        }
        if excludes.is_excluded(&child) {
            continue;
        }

        if !keep.contains(&child) {
            debug!(path = %child.display(), "Removing entry deleted at source");
            remove_existing(&entry.path())?;
            stats.removed += 1;
        } else if entry.file_type()?.is_dir() {
            prune_extraneous(destination, &child, keep, excludes, protect, stats)?;
        }
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;
    use tempfile::TempDir;

    fn no_excludes() -> ExcludeSet {
        ExcludeSet::new::<&str>(&[]).unwrap()
    }

    fn protect() -> Vec<String> {
        vec!["package-list.txt".to_string()]
    }

    fn inode(path: &Path) -> u64 {
        fs::metadata(path).unwrap().ino()
    }

    #[test]
    fn test_full_mirror_copies_tree() -> io::Result<()> {
        let source = TempDir::new()?;
        let dest = TempDir::new()?;
        fs::create_dir_all(source.path().join("etc/ssh"))?;
        fs::write(source.path().join("etc/hostname"), b"web1")?;
        fs::write(source.path().join("etc/ssh/sshd_config"), b"Port 22")?;
        std::os::unix::fs::symlink("hostname", source.path().join("etc/name"))?;

        let stats = mirror_tree(
            source.path(),
            dest.path(),
            None,
            &no_excludes(),
            &protect(),
            &CancellationToken::new(),
        )?;

        assert_eq!(stats.copied, 2);
        assert_eq!(stats.linked, 0);
        assert_eq!(fs::read(dest.path().join("etc/ssh/sshd_config"))?, b"Port 22");
        assert_eq!(
            fs::read_link(dest.path().join("etc/name"))?,
            PathBuf::from("hostname")
        );
        assert_eq!(
            FileMetadata::from_path(&dest.path().join("etc/hostname"))?.modified,
            FileMetadata::from_path(&source.path().join("etc/hostname"))?.modified
        );
        Ok(())
    }

    #[test]
    fn test_incremental_mirror_hardlinks_unchanged_files() -> io::Result<()> {
        let source = TempDir::new()?;
        let root = TempDir::new()?;
        let reference = root.path().join("2025-09-09");
        let dest = root.path().join("2025-09-10");
        fs::write(source.path().join("same.txt"), b"unchanged")?;
        fs::write(source.path().join("edited.txt"), b"version one")?;

        mirror_tree(source.path(), &reference, None, &no_excludes(), &protect(), &CancellationToken::new())?;

        fs::write(source.path().join("edited.txt"), b"version two, longer")?;
        fs::write(source.path().join("new.txt"), b"fresh")?;

        let stats = mirror_tree(
            source.path(),
            &dest,
            Some(&reference),
            &no_excludes(),
            &protect(),
            &CancellationToken::new(),
        )?;

        assert_eq!(stats.linked, 1);
        assert_eq!(stats.copied, 2);
        assert_eq!(inode(&dest.join("same.txt")), inode(&reference.join("same.txt")));
        assert_ne!(inode(&dest.join("edited.txt")), inode(&reference.join("edited.txt")));
        assert_eq!(fs::read(reference.join("edited.txt"))?, b"version one");
        assert_eq!(fs::read(dest.join("edited.txt"))?, b"version two, longer");
        Ok(())
    }

    #[test]
    fn test_mirror_removes_deleted_entries_but_keeps_protected() -> io::Result<()> {
        let source = TempDir::new()?;
        let dest = TempDir::new()?;
        fs::write(source.path().join("keep.txt"), b"keep")?;
        fs::create_dir_all(dest.path().join("old/dir"))?;
        fs::write(dest.path().join("old/dir/file"), b"gone")?;
        fs::write(dest.path().join("stale.txt"), b"gone")?;
        fs::write(dest.path().join("package-list.txt"), b"bash install\n")?;

        let stats = mirror_tree(
            source.path(),
            dest.path(),
            None,
            &no_excludes(),
            &protect(),
            &CancellationToken::new(),
        )?;

        assert_eq!(stats.removed, 2);
        assert!(!dest.path().join("old").exists());
        assert!(!dest.path().join("stale.txt").exists());
        assert!(dest.path().join("keep.txt").exists());
        assert!(dest.path().join("package-list.txt").exists());
        Ok(())
    }

    #[test]
    fn test_rewrite_in_place_does_not_touch_linked_reference() -> io::Result<()> {
        let source = TempDir::new()?;
        let root = TempDir::new()?;
        let reference = root.path().join("2025-09-09");
        let dest = root.path().join("2025-09-10");
        fs::write(source.path().join("config"), b"a=1")?;

        mirror_tree(source.path(), &reference, None, &no_excludes(), &protect(), &CancellationToken::new())?;
        mirror_tree(source.path(), &dest, Some(&reference), &no_excludes(), &protect(), &CancellationToken::new())?;
        assert_eq!(inode(&dest.join("config")), inode(&reference.join("config")));

        // Same-day rerun after a change: no reference, destination updated in place.
        fs::write(source.path().join("config"), b"a=22")?;
        let stats = mirror_tree(source.path(), &dest, None, &no_excludes(), &protect(), &CancellationToken::new())?;

        assert_eq!(stats.copied, 1);
        assert_eq!(fs::read(dest.join("config"))?, b"a=22");
        assert_eq!(fs::read(reference.join("config"))?, b"a=1");
        Ok(())
    }

    #[test]
    fn test_excluded_paths_are_neither_copied_nor_pruned() -> io::Result<()> {
        let source = TempDir::new()?;
        let dest = TempDir::new()?;
        fs::create_dir_all(source.path().join("tmp"))?;
        fs::write(source.path().join("tmp/scratch"), b"junk")?;
        fs::create_dir_all(dest.path().join("tmp"))?;
        fs::write(dest.path().join("tmp/kept-by-exclude"), b"old")?;

        let excludes = ExcludeSet::new(&["/tmp/*"]).unwrap();
        mirror_tree(source.path(), dest.path(), None, &excludes, &protect(), &CancellationToken::new())?;

        assert!(!dest.path().join("tmp/scratch").exists());
        assert!(dest.path().join("tmp/kept-by-exclude").exists());
        Ok(())
    }

    #[test]
    fn test_cancelled_mirror_is_interrupted() -> io::Result<()> {
        let source = TempDir::new()?;
        let dest = TempDir::new()?;
        fs::write(source.path().join("file"), b"x")?;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = mirror_tree(source.path(), dest.path(), None, &no_excludes(), &protect(), &cancel)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
        Ok(())
    }

    #[tokio::test]
    async fn test_transfer_reports_missing_source() {
        let dest = TempDir::new().unwrap();
        let request = TransferRequest {
            source: "/nonexistent/source/tree".to_string(),
            destination: dest.path().to_path_buf(),
            reference: None,
            excludes: vec![],
            protect: protect(),
        };
        let result = LocalTreeTransferer::new()
            .transfer(&request, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(BackupError::Transfer { .. })));
    }
}

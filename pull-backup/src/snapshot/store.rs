//! Store interface over the backup root, and its on-disk implementation.

use super::{
    parse_snapshot_name, CompletionMarker, Snapshot, COMPLETION_MARKER_FILE, LATEST_POINTER,
    PACKAGE_LIST_FILE,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Everything a backup run reads or mutates under the backup root.
///
/// Snapshots are addressed by directory name. The latest pointer is written
/// as a bare snapshot name and read back as a path under [`root`].
///
/// [`root`]: SnapshotStore::root
pub trait SnapshotStore {
    fn root(&self) -> &Path;

    fn snapshot_path(&self, name: &str) -> PathBuf {
        self.root().join(name)
    }

    fn pointer_path(&self) -> PathBuf {
        self.root().join(LATEST_POINTER)
    }

    /// Date-named directories directly under the root, oldest first.
    fn list_snapshots(&self) -> io::Result<Vec<Snapshot>>;

    /// Target of the latest pointer, or `None` when there is no pointer.
    /// The target is not checked for existence.
    fn read_pointer(&self) -> io::Result<Option<PathBuf>>;

    /// Whether `path` exists and is a directory, following links.
    fn is_directory(&self, path: &Path) -> bool;

    /// Create the pointer targeting snapshot `name`. Fails if one exists.
    fn write_pointer(&mut self, name: &str) -> io::Result<()>;

    /// Remove the pointer; a missing pointer is not an error.
    fn remove_pointer(&mut self) -> io::Result<()>;

    /// Create (or reuse) the snapshot directory and return its path.
    fn create_snapshot_dir(&mut self, name: &str) -> io::Result<PathBuf>;

    fn write_manifest(&mut self, name: &str, manifest: &str) -> io::Result<()>;

    fn write_completion_marker(&mut self, name: &str, marker: &CompletionMarker)
        -> io::Result<()>;

    fn read_completion_marker(&self, name: &str) -> io::Result<Option<CompletionMarker>>;

    /// Remove the completion marker; a missing marker is not an error.
    fn clear_completion_marker(&mut self, name: &str) -> io::Result<()>;

    /// Recursively delete snapshot `name`.
    fn delete_snapshot(&mut self, name: &str) -> io::Result<()>;
}

/// Snapshot store backed by a real directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open the backup root, creating it if needed.
    ///
    /// A relative root is made absolute against the working directory:
    /// rsync resolves a relative `--link-dest` against the destination, so
    /// every path handed out by the store must be absolute.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let mut root = root.into();
        if root.is_relative() {
            root = std::env::current_dir()?.join(root);
        }
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }
}

impl SnapshotStore for FsStore {
    fn root(&self) -> &Path {
        &self.root
    }

    fn list_snapshots(&self) -> io::Result<Vec<Snapshot>> {
        let mut snapshots = Vec::new();

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(date) = parse_snapshot_name(name) else {
                continue;
            };
            // DirEntry::file_type does not follow links; a link named like a
            // date is not a snapshot.
            if !entry.file_type()?.is_dir() {
                continue;
            }

            let path = entry.path();
            let complete = path.join(COMPLETION_MARKER_FILE).is_file();
            snapshots.push(Snapshot {
                name: name.to_string(),
                date,
                path,
                complete,
            });
        }

        snapshots.sort_by_key(|s| s.date);
        Ok(snapshots)
    }

    fn read_pointer(&self) -> io::Result<Option<PathBuf>> {
        let pointer = self.pointer_path();
        match fs::symlink_metadata(&pointer) {
            Ok(meta) if meta.file_type().is_symlink() => {}
            Ok(_) => {
                debug!(path = %pointer.display(), "Latest pointer is not a link, ignoring it");
                return Ok(None);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        }

        let target = fs::read_link(&pointer)?;
        if target.is_absolute() {
            Ok(Some(target))
        } else {
            Ok(Some(self.root.join(target)))
        }
    }

    fn is_directory(&self, path: &Path) -> bool {
        fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
    }

    #[cfg(unix)]
    fn write_pointer(&mut self, name: &str) -> io::Result<()> {
        std::os::unix::fs::symlink(name, self.pointer_path())
    }

    #[cfg(not(unix))]
    fn write_pointer(&mut self, _name: &str) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "latest pointer requires symbolic links",
        ))
    }

    fn remove_pointer(&mut self) -> io::Result<()> {
        match fs::remove_file(self.pointer_path()) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn create_snapshot_dir(&mut self, name: &str) -> io::Result<PathBuf> {
        let path = self.snapshot_path(name);
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    fn write_manifest(&mut self, name: &str, manifest: &str) -> io::Result<()> {
        fs::write(self.snapshot_path(name).join(PACKAGE_LIST_FILE), manifest)
    }

    fn write_completion_marker(
        &mut self,
        name: &str,
        marker: &CompletionMarker,
    ) -> io::Result<()> {
        let json = serde_json::to_vec_pretty(marker)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(self.snapshot_path(name).join(COMPLETION_MARKER_FILE), json)
    }

    fn read_completion_marker(&self, name: &str) -> io::Result<Option<CompletionMarker>> {
        let path = self.snapshot_path(name).join(COMPLETION_MARKER_FILE);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn clear_completion_marker(&mut self, name: &str) -> io::Result<()> {
        match fs::remove_file(self.snapshot_path(name).join(COMPLETION_MARKER_FILE)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn delete_snapshot(&mut self, name: &str) -> io::Result<()> {
        if parse_snapshot_name(name).is_none() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{name} is not a snapshot name"),
            ));
        }

        let path = self.snapshot_path(name);
        let meta = fs::symlink_metadata(&path)?;
        if !meta.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", path.display()),
            ));
        }
        fs::remove_dir_all(&path)
    }
}

//! In-memory snapshot store for exercising backup runs without a disk.

use super::store::SnapshotStore;
use super::{parse_snapshot_name, CompletionMarker, Snapshot};
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
struct MemoryDir {
    manifest: Option<String>,
    marker: Option<CompletionMarker>,
}

/// A [`SnapshotStore`] that keeps the backup root in a map.
///
/// Directories with any name can be added, so non-snapshot entries can sit
/// next to snapshots. Deletions and pointer writes can be made to fail.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    root: PathBuf,
    dirs: BTreeMap<String, MemoryDir>,
    pointer: Option<String>,
    failing_deletes: HashSet<String>,
    fail_pointer_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_root("/backups")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dirs: BTreeMap::new(),
            pointer: None,
            failing_deletes: HashSet::new(),
            fail_pointer_writes: false,
        }
    }

    /// Add an empty directory (snapshot or not) at the root.
    pub fn add_directory(&mut self, name: &str) {
        self.dirs.entry(name.to_string()).or_default();
    }

    /// Point `latest` at `target` without checking that it exists.
    pub fn set_pointer(&mut self, target: &str) {
        self.pointer = Some(target.to_string());
    }

    /// Make every deletion of `name` fail with permission denied.
    pub fn fail_delete(&mut self, name: &str) {
        self.failing_deletes.insert(name.to_string());
    }

    pub fn fail_pointer_writes(&mut self, fail: bool) {
        self.fail_pointer_writes = fail;
    }

    pub fn pointer_target(&self) -> Option<&str> {
        self.pointer.as_deref()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.dirs.contains_key(name)
    }

    pub fn manifest(&self, name: &str) -> Option<&str> {
        self.dirs.get(name).and_then(|d| d.manifest.as_deref())
    }

    pub fn is_complete(&self, name: &str) -> bool {
        self.dirs.get(name).is_some_and(|d| d.marker.is_some())
    }

    fn dir_name<'a>(&self, path: &'a Path) -> Option<&'a str> {
        let rest = path.strip_prefix(&self.root).ok()?;
        let name = rest.to_str()?;
        (!name.is_empty() && !name.contains('/')).then_some(name)
    }

    fn dir_mut(&mut self, name: &str) -> io::Result<&mut MemoryDir> {
        self.dirs
            .get_mut(name)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{name} not found")))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore for MemoryStore {
    fn root(&self) -> &Path {
        &self.root
    }

    fn list_snapshots(&self) -> io::Result<Vec<Snapshot>> {
        let mut snapshots: Vec<Snapshot> = self
            .dirs
            .iter()
            .filter_map(|(name, dir)| {
                parse_snapshot_name(name).map(|date| Snapshot {
                    name: name.clone(),
                    date,
                    path: self.root.join(name),
                    complete: dir.marker.is_some(),
                })
            })
            .collect();
        snapshots.sort_by_key(|s| s.date);
        Ok(snapshots)
    }

    fn read_pointer(&self) -> io::Result<Option<PathBuf>> {
        Ok(self.pointer.as_ref().map(|target| self.root.join(target)))
    }

    fn is_directory(&self, path: &Path) -> bool {
        self.dir_name(path).is_some_and(|name| self.dirs.contains_key(name))
    }

    fn write_pointer(&mut self, name: &str) -> io::Result<()> {
        if self.fail_pointer_writes {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "pointer writes disabled",
            ));
        }
        if self.pointer.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "latest pointer already exists",
            ));
        }
        self.pointer = Some(name.to_string());
        Ok(())
    }

    fn remove_pointer(&mut self) -> io::Result<()> {
        self.pointer = None;
        Ok(())
    }

    fn create_snapshot_dir(&mut self, name: &str) -> io::Result<PathBuf> {
        self.add_directory(name);
        Ok(self.root.join(name))
    }

    fn write_manifest(&mut self, name: &str, manifest: &str) -> io::Result<()> {
        self.dir_mut(name)?.manifest = Some(manifest.to_string());
        Ok(())
    }

    fn write_completion_marker(
        &mut self,
        name: &str,
        marker: &CompletionMarker,
    ) -> io::Result<()> {
        self.dir_mut(name)?.marker = Some(marker.clone());
        Ok(())
    }

    fn read_completion_marker(&self, name: &str) -> io::Result<Option<CompletionMarker>> {
        Ok(self.dirs.get(name).and_then(|d| d.marker.clone()))
    }

    fn clear_completion_marker(&mut self, name: &str) -> io::Result<()> {
        if let Some(dir) = self.dirs.get_mut(name) {
            dir.marker = None;
        }
        Ok(())
    }

    fn delete_snapshot(&mut self, name: &str) -> io::Result<()> {
        if self.failing_deletes.contains(name) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("cannot delete {name}"),
            ));
        }
        self.dirs
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{name} not found")))
    }
}

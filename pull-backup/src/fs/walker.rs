//! Directory traversal with rsync-style exclusion rules.
//!
//! Exclude patterns are matched against the path relative to the transfer
//! root, written with a leading `/`. A pattern starting with `/` is anchored
//! at the root (`/proc/*`); any other pattern matches at every depth
//! (`*.swp`). As in rsync, `*` stops at `/` while `**` crosses it.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Compiled exclusion patterns.
#[derive(Debug, Clone)]
pub struct ExcludeSet {
    set: GlobSet,
}

impl ExcludeSet {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, globset::Error> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim_end_matches('/');
            if pattern.is_empty() {
                continue;
            }
            let pattern = if pattern.starts_with('/') {
                pattern.to_string()
            } else {
                format!("**/{pattern}")
            };
            builder.add(GlobBuilder::new(&pattern).literal_separator(true).build()?);
        }
        Ok(Self {
            set: builder.build()?,
        })
    }

    /// Whether `relative` (a path below the transfer root) is excluded.
    pub fn is_excluded(&self, relative: &Path) -> bool {
        if relative.as_os_str().is_empty() {
            return false;
        }
        self.set.is_match(Path::new("/").join(relative))
    }
}

/// Kind of a tree entry. Links are never followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
    Symlink,
    /// Devices, fifos and sockets; not copied by the local engine.
    Special,
}

/// Information about an entry discovered during walking
#[derive(Debug, Clone)]
pub struct TreeEntry {
    /// Full path to the entry
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    pub kind: EntryKind,
}

/// Walk a tree below `root`, parents before children, skipping excluded
/// entries and everything beneath excluded directories. The root itself is
/// not returned.
pub fn walk_tree(root: &Path, excludes: &ExcludeSet) -> std::io::Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            !excludes.is_excluded(relative)
        });

    for entry in walker {
        let entry = entry?;
        let file_type = entry.file_type();
        let kind = if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Dir
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            EntryKind::Special
        };

        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();

        entries.push(TreeEntry {
            path,
            relative_path,
            kind,
        });
    }

    Ok(entries)
}

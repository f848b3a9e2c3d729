//! Filesystem helpers for the in-process transfer engine.

pub mod metadata;
pub mod walker;

pub use metadata::FileMetadata;
pub use walker::{walk_tree, EntryKind, ExcludeSet, TreeEntry};

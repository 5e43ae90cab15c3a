//! Mutable tree staging (C6) and the dirtree serializer (C8).
//!
//! The staging shape — per-directory name→checksum and name→subtree maps
//! built up in memory before a single bottom-up serialization pass —
//! follows `jj-vcs-jj`'s `tree_builder.rs`, adapted from its path-keyed
//! override map to this engine's explicit recursive node shape; `BTreeMap`
//! is kept for the same reason `TreeBuilder` uses it there: free,
//! insertion-order-independent sorting.

use crate::checksum::{ObjectChecksum, ObjectType};
use crate::error::{Error, Result};
use crate::repo::Repo;
use crate::transaction::CancelHandle;
use crate::variant::{encode_dirtree, FileEntry, SubdirEntry};
use std::collections::BTreeMap;

fn invalid_component(name: &str) -> Error {
    Error::io(
        "mtree path component",
        std::io::Error::other(format!("invalid path component {name:?}")),
    )
}

fn check_component(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(invalid_component(name));
    }
    Ok(())
}

/// In-memory staging node (§3 "Mutable tree"): file/subdir maps plus cached
/// serialization checksums, invalidated whenever the maps they summarize
/// change.
#[derive(Debug, Default)]
pub struct MutableTree {
    files: BTreeMap<String, ObjectChecksum>,
    subdirs: BTreeMap<String, MutableTree>,
    metadata_checksum: Option<ObjectChecksum>,
    contents_checksum: Option<ObjectChecksum>,
}

impl MutableTree {
    /// An empty staging node with no cached checksums.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get-or-create the named child subdirectory. Fails if `name` already
    /// names a file in this node.
    pub fn ensure_dir(&mut self, name: &str) -> Result<&mut MutableTree> {
        check_component(name)?;
        if self.files.contains_key(name) {
            return Err(Error::io(
                "mtree ensure_dir",
                std::io::Error::other(format!("{name} already names a file")),
            ));
        }
        self.contents_checksum = None;
        Ok(self.subdirs.entry(name.to_string()).or_default())
    }

    /// Record (or overwrite) the content checksum for a file/symlink entry.
    /// Fails if `name` already names a subdirectory in this node.
    pub fn replace_file(&mut self, name: &str, checksum: ObjectChecksum) -> Result<()> {
        check_component(name)?;
        if self.subdirs.contains_key(name) {
            return Err(Error::io(
                "mtree replace_file",
                std::io::Error::other(format!("{name} already names a directory")),
            ));
        }
        self.files.insert(name.to_string(), checksum);
        self.contents_checksum = None;
        Ok(())
    }

    /// Cache this node's `DIR_META` checksum (its own ownership/mode/xattrs).
    pub fn set_metadata_checksum(&mut self, checksum: ObjectChecksum) {
        self.metadata_checksum = Some(checksum);
    }

    /// Cache this node's `DIR_TREE` checksum directly, bypassing
    /// [`write_mtree`] — used by the ingest reuse shortcut (§4.6) when a
    /// subtree is already known to be identical to a stored one.
    pub fn set_contents_checksum(&mut self, checksum: ObjectChecksum) {
        self.contents_checksum = Some(checksum);
    }

    /// This node's cached `DIR_META` checksum, if one has been set.
    pub fn get_metadata_checksum(&self) -> Option<ObjectChecksum> {
        self.metadata_checksum
    }

    /// This node's cached `DIR_TREE` checksum, if [`write_mtree`] has run (or
    /// the reuse shortcut set one directly) since the last mutation.
    pub fn get_contents_checksum(&self) -> Option<ObjectChecksum> {
        self.contents_checksum
    }

    /// This node's direct file/symlink entries, by name.
    pub fn get_files(&self) -> &BTreeMap<String, ObjectChecksum> {
        &self.files
    }

    /// This node's direct subdirectories, by name.
    pub fn get_subdirs(&self) -> &BTreeMap<String, MutableTree> {
        &self.subdirs
    }

    /// Whether this node has no files and no subdirectories, consulted by
    /// the ingest reuse shortcut (§4.6) before trusting a cached contents
    /// checksum on an otherwise-untouched node.
    pub(crate) fn is_empty(&self) -> bool {
        self.files.is_empty() && self.subdirs.is_empty()
    }
}

/// Fold a mutable tree into `DIR_TREE` objects bottom-up (C8), returning the
/// checksum of the `DIR_TREE` object for `tree` itself. Subdirectories are
/// serialized (and their own checksums cached) before their parent, and
/// both files and subdirs are emitted in ascending name order — `BTreeMap`
/// iteration order — independent of insertion order (§8 "Sort stability").
pub fn write_mtree(repo: &Repo, cancel: &CancelHandle, tree: &mut MutableTree) -> Result<ObjectChecksum> {
    if let Some(cached) = tree.contents_checksum {
        return Ok(cached);
    }
    cancel.check()?;

    let mut subdir_entries = Vec::with_capacity(tree.subdirs.len());
    for (name, child) in tree.subdirs.iter_mut() {
        let contents = write_mtree(repo, cancel, child)?;
        let metadata = child.metadata_checksum.ok_or_else(|| {
            Error::io(
                "write_mtree",
                std::io::Error::other(format!("subdirectory {name:?} has no metadata checksum")),
            )
        })?;
        subdir_entries.push((name.clone(), contents, metadata));
    }
    let file_entries: Vec<(String, ObjectChecksum)> =
        tree.files.iter().map(|(name, csum)| (name.clone(), *csum)).collect();

    let files: Vec<FileEntry<'_>> = file_entries
        .iter()
        .map(|(name, checksum)| FileEntry { name, checksum: *checksum })
        .collect();
    let subdirs: Vec<SubdirEntry<'_>> = subdir_entries
        .iter()
        .map(|(name, contents, metadata)| SubdirEntry {
            name,
            contents: *contents,
            metadata: *metadata,
        })
        .collect();

    let data = encode_dirtree(&files, &subdirs);
    let checksum = repo.write_metadata(cancel, ObjectType::DirTree, &data)?;
    tree.contents_checksum = Some(checksum);
    Ok(checksum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::RepoMode;

    #[test]
    fn replace_file_rejects_directory_name_collision() {
        let mut tree = MutableTree::new();
        tree.ensure_dir("a").unwrap();
        let err = tree.replace_file("a", ObjectChecksum([1u8; 32])).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn ensure_dir_rejects_file_name_collision() {
        let mut tree = MutableTree::new();
        tree.replace_file("a", ObjectChecksum([1u8; 32])).unwrap();
        assert!(tree.ensure_dir("a").is_err());
    }

    #[test]
    fn rejects_invalid_path_components() {
        let mut tree = MutableTree::new();
        assert!(tree.replace_file("a/b", ObjectChecksum([1u8; 32])).is_err());
        assert!(tree.replace_file("..", ObjectChecksum([1u8; 32])).is_err());
    }

    #[test]
    fn serialization_is_insertion_order_independent() {
        let td = tempfile::tempdir().unwrap();
        let repo = Repo::init(&td.path().join("repo"), RepoMode::Bare).unwrap();
        repo.prepare_transaction().unwrap();
        let cancel = CancelHandle::never();

        let mut forward = MutableTree::new();
        forward.replace_file("a", ObjectChecksum([1u8; 32])).unwrap();
        forward.replace_file("b", ObjectChecksum([2u8; 32])).unwrap();
        forward.set_metadata_checksum(ObjectChecksum([9u8; 32]));
        let forward_csum = write_mtree(&repo, &cancel, &mut forward).unwrap();

        let mut backward = MutableTree::new();
        backward.replace_file("b", ObjectChecksum([2u8; 32])).unwrap();
        backward.replace_file("a", ObjectChecksum([1u8; 32])).unwrap();
        backward.set_metadata_checksum(ObjectChecksum([9u8; 32]));
        let backward_csum = write_mtree(&repo, &cancel, &mut backward).unwrap();

        assert_eq!(forward_csum, backward_csum);
    }

    #[test]
    fn missing_subdir_metadata_checksum_is_an_error() {
        let td = tempfile::tempdir().unwrap();
        let repo = Repo::init(&td.path().join("repo"), RepoMode::Bare).unwrap();
        repo.prepare_transaction().unwrap();
        let cancel = CancelHandle::never();

        let mut tree = MutableTree::new();
        tree.ensure_dir("sub").unwrap();
        assert!(write_mtree(&repo, &cancel, &mut tree).is_err());
    }
}

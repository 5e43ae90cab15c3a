//! The devino cache (C5): a `(dev, ino) → checksum` lookaside populated by
//! scanning already-stored content objects, so hardlinked input files skip
//! re-hashing entirely during ingest (§4.6).

use crate::checksum::{ObjectChecksum, ObjectType};
use crate::error::{Error, Result};
use crate::repo::Repo;
use cap_std::fs::MetadataExt;
use cap_std_ext::cap_std;
use std::collections::HashMap;

/// Device/inode pair identifying a file on a single filesystem.
type DevIno = (u64, u64);

/// Populated once per transaction by [`Repo::scan_hardlinks`] and consulted
/// read-only afterward by the ingest walk (C7).
#[derive(Debug, Default)]
pub struct DevinoCache {
    entries: HashMap<DevIno, ObjectChecksum>,
}

impl DevinoCache {
    pub(crate) fn lookup(&self, dev: u64, ino: u64) -> Option<ObjectChecksum> {
        self.entries.get(&(dev, ino)).copied()
    }

    fn insert(&mut self, dev: u64, ino: u64, checksum: ObjectChecksum) {
        self.entries.insert((dev, ino), checksum);
    }

    /// Walk one repository's `objects/` fanout directories, inserting every
    /// `.file` entry found. Only bare-mode `.file` hardlinks are useful as
    /// hardlink sources, so this looks for the `.file` suffix regardless of
    /// `repo`'s own mode — an archive-mode repo's `.filez` objects are
    /// compressed and can never be hardlinked into a caller's tree (§4.4,
    /// §9). Entries from a later call (i.e. a closer-to-self repo) win ties,
    /// per the parent-first recursion in [`scan_chain`].
    fn scan_repo(&mut self, repo: &Repo) -> Result<()> {
        let want_ext = ".file";
        for fanout in repo.objects_dir().entries().map_err(|e| Error::io("readdir objects", e))? {
            let fanout = fanout.map_err(|e| Error::io("readdir objects", e))?;
            if !fanout.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let fanout_name = fanout.file_name();
            let Some(fanout_str) = fanout_name.to_str() else {
                continue;
            };
            let fanout_dir = repo
                .objects_dir()
                .open_dir(&fanout_name)
                .map_err(|e| Error::io("opendir fanout", e))?;
            for entry in fanout_dir.entries().map_err(|e| Error::io("readdir fanout", e))? {
                let entry = entry.map_err(|e| Error::io("readdir fanout", e))?;
                if entry.file_type().map(|t| t.is_dir()).unwrap_or(true) {
                    continue;
                }
                let name = entry.file_name();
                let Some(name_str) = name.to_str() else {
                    continue;
                };
                let Some(stem) = name_str.strip_suffix(want_ext) else {
                    continue;
                };
                if stem.len() != 62 {
                    continue;
                }
                let full_hex = format!("{fanout_str}{stem}");
                let Ok(checksum) = full_hex.parse::<ObjectChecksum>() else {
                    continue;
                };
                let metadata = entry.metadata().map_err(|e| Error::io("fstatat devino", e))?;
                self.insert(metadata.dev(), metadata.ino(), checksum);
            }
        }
        Ok(())
    }
}

/// Depth-first, parent-first recursion so nearer repos' entries overwrite
/// farther ones at the same `(dev, ino)` key (§4.4 step 2/4).
fn scan_chain(repo: &Repo, cache: &mut DevinoCache) -> Result<()> {
    if let Some(parent) = repo.parent() {
        scan_chain(parent, cache)?;
    }
    cache.scan_repo(repo)
}

impl Repo {
    /// Populate the devino cache for the active transaction by scanning
    /// this repository (and its parent chain) for loose `.file` objects.
    /// Replaces any existing cache contents.
    #[tracing::instrument(skip(self))]
    pub fn scan_hardlinks(&self) -> Result<()> {
        let handle = self.devino_handle()?;
        let mut cache = DevinoCache::default();
        scan_chain(self, &mut cache)?;
        let count = cache.entries.len();
        *handle.write().unwrap() = Some(cache);
        tracing::debug!(count, "devino scan complete");
        Ok(())
    }

    /// Look up a `(dev, ino)` pair in the active transaction's devino cache,
    /// if one has been populated. Returns `Ok(None)` rather than erroring
    /// when no scan has run yet, since consulting the cache is optional.
    pub(crate) fn devino_lookup(&self, dev: u64, ino: u64) -> Result<Option<ObjectChecksum>> {
        let handle = self.devino_handle()?;
        let guard = handle.read().unwrap();
        Ok(guard.as_ref().and_then(|c| c.lookup(dev, ino)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::RepoMode;
    use std::os::unix::fs::MetadataExt as _;

    #[test]
    fn scan_finds_nothing_in_empty_repo() {
        let td = tempfile::tempdir().unwrap();
        let repo = Repo::init(&td.path().join("repo"), RepoMode::Bare).unwrap();
        repo.prepare_transaction().unwrap();
        repo.scan_hardlinks().unwrap();
        assert_eq!(repo.devino_lookup(0, 0).unwrap(), None);
    }

    #[test]
    fn scan_finds_manually_placed_loose_object() {
        let td = tempfile::tempdir().unwrap();
        let repo = Repo::init(&td.path().join("repo"), RepoMode::Bare).unwrap();
        let csum = ObjectChecksum::of_bytes(b"hello");
        let relpath = crate::checksum::object_relpath(&csum, ObjectType::File, RepoMode::Bare);
        let objects_root = td.path().join("repo").join("objects");
        std::fs::create_dir_all(relpath.parent().map(|p| objects_root.join(p.as_str())).unwrap()).unwrap();
        let full_path = objects_root.join(relpath.as_str());
        std::fs::write(&full_path, b"hello").unwrap();
        let stat = std::fs::metadata(&full_path).unwrap();

        repo.prepare_transaction().unwrap();
        repo.scan_hardlinks().unwrap();
        assert_eq!(repo.devino_lookup(stat.dev(), stat.ino()).unwrap(), Some(csum));
    }

    #[test]
    fn scan_ignores_filez_objects_in_archive_mode_repo() {
        let td = tempfile::tempdir().unwrap();
        let repo = Repo::init(&td.path().join("repo"), RepoMode::ArchiveZ2).unwrap();
        let csum = ObjectChecksum::of_bytes(b"hello");
        let relpath = crate::checksum::object_relpath(&csum, ObjectType::File, RepoMode::ArchiveZ2);
        let objects_root = td.path().join("repo").join("objects");
        std::fs::create_dir_all(relpath.parent().map(|p| objects_root.join(p.as_str())).unwrap()).unwrap();
        let full_path = objects_root.join(relpath.as_str());
        std::fs::write(&full_path, b"hello").unwrap();
        let stat = std::fs::metadata(&full_path).unwrap();

        repo.prepare_transaction().unwrap();
        repo.scan_hardlinks().unwrap();
        assert_eq!(repo.devino_lookup(stat.dev(), stat.ino()).unwrap(), None);
    }
}

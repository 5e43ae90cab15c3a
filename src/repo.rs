//! The repository handle: mode/config, object path policy (C1), and the
//! loose-object existence probe (C2).

use crate::checksum::{object_relpath, ObjectChecksum, ObjectType};
use crate::error::{Error, Result};
use crate::transaction::TransactionState;
use camino::Utf8PathBuf;
use cap_std::fs::Dir;
use cap_std_ext::cap_std;
use cap_std_ext::dirext::CapStdExtDirExt;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Storage mode: whether loose objects carry their real filesystem
/// attributes (`Bare`) or have them serialized into an archive header
/// (`ArchiveZ2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepoMode {
    /// Files stored verbatim with their real uid/gid/mode/xattrs.
    Bare,
    /// Files stored as a header variant plus zlib-RAW-compressed payload.
    ArchiveZ2,
}

#[derive(Debug, Serialize, Deserialize)]
struct RepoConfig {
    mode: RepoMode,
}

/// A content-addressed filesystem-tree repository.
///
/// Cheap to clone: all state lives behind an `Arc`, so a clone is a handle
/// to the same open directories and the same transaction.
#[derive(Debug, Clone)]
pub struct Repo {
    pub(crate) inner: Arc<RepoInner>,
}

#[derive(Debug)]
pub(crate) struct RepoInner {
    pub(crate) mode: RepoMode,
    pub(crate) root: Dir,
    pub(crate) objects_dir: Dir,
    pub(crate) tmp_dir: Dir,
    pub(crate) parent: Option<Repo>,
    pub(crate) txn: Mutex<Option<TransactionState>>,
}

impl Repo {
    /// Initialize a brand new repository at `path` (which must already
    /// exist as an empty or non-existent directory's parent).
    pub fn init(path: &std::path::Path, mode: RepoMode) -> Result<Self> {
        std::fs::create_dir_all(path).map_err(|e| Error::io_path("mkdir", path_to_utf8(path), e))?;
        let root = Dir::open_ambient_dir(path, cap_std::ambient_authority())
            .map_err(|e| Error::io_path("opendir", path_to_utf8(path), e))?;
        root.ensure_dir_all("objects", 0o755)
            .map_err(|e| Error::io("mkdir objects", e))?;
        root.ensure_dir_all("tmp", 0o755)
            .map_err(|e| Error::io("mkdir tmp", e))?;
        let config = RepoConfig { mode };
        root.write_file_with("config.json", 0o644, |w| {
            serde_json::to_writer_pretty(w, &config).map_err(|e| e.into())
        })
        .map_err(|e: anyhow::Error| Error::io("write config", std::io::Error::other(e.to_string())))?;
        Self::open(path)
    }

    /// Open an existing repository, reading back its persisted mode.
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let root = Dir::open_ambient_dir(path, cap_std::ambient_authority())
            .map_err(|e| Error::io_path("opendir", path_to_utf8(path), e))?;
        let config_data = root
            .read_to_string("config.json")
            .map_err(|e| Error::io("read config", e))?;
        let config: RepoConfig = serde_json::from_str(&config_data)
            .map_err(|e| Error::io("parse config", std::io::Error::other(e.to_string())))?;
        let objects_dir = root.open_dir("objects").map_err(|e| Error::io("opendir objects", e))?;
        let tmp_dir = root.open_dir("tmp").map_err(|e| Error::io("opendir tmp", e))?;
        Ok(Repo {
            inner: Arc::new(RepoInner {
                mode: config.mode,
                root,
                objects_dir,
                tmp_dir,
                parent: None,
                txn: Mutex::new(None),
            }),
        })
    }

    /// Attach a parent repository, consulted on lookup misses (see
    /// [`Repo::has_object`] and [`crate::devino`]). Must be called right
    /// after [`Repo::open`]/[`Repo::init`], before any clone of the handle
    /// is taken.
    pub fn with_parent(self, parent: Repo) -> Self {
        let inner = Arc::try_unwrap(self.inner)
            .unwrap_or_else(|_| panic!("with_parent requires the sole owner of this Repo handle"));
        Repo {
            inner: Arc::new(RepoInner {
                parent: Some(parent),
                ..inner
            }),
        }
    }

    /// The storage mode this repository was initialized with.
    pub fn mode(&self) -> RepoMode {
        self.inner.mode
    }

    /// Directory file descriptor for `objects/`.
    pub(crate) fn objects_dir(&self) -> &Dir {
        &self.inner.objects_dir
    }

    /// Directory file descriptor for `tmp/`.
    pub(crate) fn tmp_dir(&self) -> &Dir {
        &self.inner.tmp_dir
    }

    /// Directory file descriptor for the repository root (used for the
    /// transaction lock symlink).
    pub(crate) fn root_dir(&self) -> &Dir {
        &self.inner.root
    }

    /// The parent repository consulted on lookup misses, if any.
    pub(crate) fn parent(&self) -> Option<&Repo> {
        self.inner.parent.as_ref()
    }

    /// C2: does this repository (or a parent repository) already hold this
    /// loose object? Side-effect free.
    pub fn has_object(&self, checksum: &ObjectChecksum, objtype: ObjectType) -> Result<(bool, Utf8PathBuf)> {
        let relpath = object_relpath(checksum, objtype, self.mode());
        match self.inner.objects_dir.try_exists(relpath.as_std_path()) {
            Ok(true) => return Ok((true, relpath)),
            Ok(false) => {}
            Err(e) => return Err(Error::io_path("faccessat", relpath, e)),
        }
        if let Some(parent) = &self.inner.parent {
            return parent.has_object(checksum, objtype);
        }
        Ok((false, relpath))
    }
}

fn path_to_utf8(p: &std::path::Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(p.to_path_buf()).unwrap_or_else(|p| Utf8PathBuf::from(p.to_string_lossy().into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_and_reopen_roundtrips_mode() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("repo");
        Repo::init(&path, RepoMode::ArchiveZ2).unwrap();
        let repo = Repo::open(&path).unwrap();
        assert_eq!(repo.mode(), RepoMode::ArchiveZ2);
    }

    #[test]
    fn has_object_false_on_fresh_repo() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("repo");
        let repo = Repo::init(&path, RepoMode::Bare).unwrap();
        let csum = ObjectChecksum([9u8; 32]);
        let (present, _) = repo.has_object(&csum, ObjectType::File).unwrap();
        assert!(!present);
    }
}

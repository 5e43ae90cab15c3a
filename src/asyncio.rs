//! Async entry points (A4, spec.md §5): thin wrappers that run the blocking
//! writer work on a `tokio` blocking-pool thread, mirroring the shape of the
//! teacher's own `tokio_util::spawn_blocking_flatten` but built directly
//! against this crate's `Result` rather than pulling in `futures_util` for a
//! single `.map()` over a `JoinHandle`.

use crate::checksum::{ObjectChecksum, ObjectType};
use crate::error::{Error, Result};
use crate::repo::Repo;
use crate::transaction::CancelHandle;
use crate::writer::FileInfo;
use std::io::{Cursor, Read};

fn join_err(e: tokio::task::JoinError) -> Error {
    Error::io("spawn_blocking join", std::io::Error::other(e))
}

impl Repo {
    /// Async wrapper around [`Repo::write_metadata`]: moves the hash-then-
    /// install work onto the blocking pool so an async caller never stalls
    /// its executor on disk I/O.
    pub async fn write_metadata_async(
        &self,
        cancel: CancelHandle,
        objtype: ObjectType,
        data: Vec<u8>,
    ) -> Result<ObjectChecksum> {
        let repo = self.clone();
        tokio::task::spawn_blocking(move || repo.write_metadata(&cancel, objtype, &data))
            .await
            .map_err(join_err)?
    }

    /// Async wrapper around [`Repo::write_content`] for content already
    /// fully resident in memory — the common case for async callers, which
    /// rarely hold a `Read` impl that's also `Send + 'static`.
    pub async fn write_content_async(
        &self,
        cancel: CancelHandle,
        info: FileInfo,
        xattrs: Vec<(Vec<u8>, Vec<u8>)>,
        content: Option<Vec<u8>>,
    ) -> Result<ObjectChecksum> {
        let repo = self.clone();
        let declared_length = content.as_ref().map(|c| c.len() as u64).unwrap_or(0);
        tokio::task::spawn_blocking(move || {
            let mut reader = content.map(Cursor::new);
            let reader_ref: Option<&mut dyn Read> = reader.as_mut().map(|r| r as &mut dyn Read);
            repo.write_content(&cancel, &info, &xattrs, reader_ref, declared_length)
        })
        .await
        .map_err(join_err)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::RepoMode;
    use crate::writer::FileType;

    #[tokio::test]
    async fn write_metadata_async_roundtrips() {
        let td = tempfile::tempdir().unwrap();
        let repo = Repo::init(&td.path().join("repo"), RepoMode::Bare).unwrap();
        repo.prepare_transaction().unwrap();
        let csum = repo
            .write_metadata_async(CancelHandle::never(), ObjectType::DirTree, b"not really a dirtree".to_vec())
            .await
            .unwrap();
        assert!(repo.has_object(&csum, ObjectType::DirTree).unwrap().0);
    }

    #[tokio::test]
    async fn write_content_async_roundtrips() {
        let td = tempfile::tempdir().unwrap();
        let repo = Repo::init(&td.path().join("repo"), RepoMode::Bare).unwrap();
        repo.prepare_transaction().unwrap();
        let info = FileInfo {
            file_type: FileType::Regular,
            uid: 0,
            gid: 0,
            mode: 0o100644,
            symlink_target: None,
        };
        let csum = repo
            .write_content_async(CancelHandle::never(), info, Vec::new(), Some(b"hello".to_vec()))
            .await
            .unwrap();
        assert!(repo.has_object(&csum, ObjectType::File).unwrap().0);
    }
}

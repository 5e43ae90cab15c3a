//! Directory ingest (C7): walk a filesystem tree into a [`MutableTree`],
//! consulting the devino cache and the commit filter along the way.

use crate::checksum::{ObjectChecksum, ObjectType};
use crate::error::{Error, Result};
use crate::modifier::{apply_filter, CommitModifier, FilterVerdict};
use crate::mtree::MutableTree;
use crate::repo::Repo;
use crate::transaction::CancelHandle;
use crate::writer::{FileInfo, FileType};
use cap_std::fs::{Dir, MetadataExt};
use cap_std_ext::cap_std;

/// What [`write_directory_to_mtree`] walks: a fresh filesystem directory, or
/// a subtree already known to be committed. The latter is this engine's
/// stand-in for the real checkout-backed "already a repo object" reuse
/// shortcut (§4.6) — there's no VFS/checkout layer in scope here, so a
/// caller that already knows a subtree's checksums (e.g. from a prior
/// commit it's rebuilding on top of) supplies them directly instead of
/// re-walking identical files.
pub enum IngestSource<'a> {
    /// Walk this open directory from scratch.
    Directory(&'a Dir),
    /// Skip the walk: trust that this subtree already matches these checksums.
    AlreadyCommitted {
        /// The subtree's `DIR_TREE` checksum.
        contents: ObjectChecksum,
        /// The subtree's own `DIR_META` checksum.
        metadata: ObjectChecksum,
    },
}

/// Walk `source` into `mtree`, hashing/writing every file and subdirectory
/// it finds. `modifier`, if given, is consulted once per logical path.
pub fn write_directory_to_mtree(
    repo: &Repo,
    cancel: &CancelHandle,
    source: IngestSource<'_>,
    mtree: &mut MutableTree,
    modifier: Option<&CommitModifier>,
) -> Result<()> {
    let mut path_stack = Vec::new();
    ingest(repo, cancel, source, mtree, modifier, &mut path_stack)
}

fn ingest(
    repo: &Repo,
    cancel: &CancelHandle,
    source: IngestSource<'_>,
    mtree: &mut MutableTree,
    modifier: Option<&CommitModifier>,
    path_stack: &mut Vec<String>,
) -> Result<()> {
    cancel.check()?;
    let dir = match source {
        // The reuse shortcut: trust the caller's checksums outright and
        // skip the walk entirely for this subtree.
        IngestSource::AlreadyCommitted { contents, metadata } => {
            mtree.set_metadata_checksum(metadata);
            if mtree.is_empty() {
                mtree.set_contents_checksum(contents);
            }
            return Ok(());
        }
        IngestSource::Directory(dir) => dir,
    };

    write_own_dirmeta(repo, cancel, dir, modifier, path_stack, mtree)?;

    for entry in dir.entries().map_err(|e| Error::io("readdir", e))? {
        let entry = entry.map_err(|e| Error::io("readdir", e))?;
        let name = entry.file_name();
        let Some(name_str) = name.to_str() else {
            return Err(Error::io(
                "ingest",
                std::io::Error::other(format!("non-UTF8 filename {name:?}")),
            ));
        };
        let name_str = name_str.to_string();
        let file_type = entry.file_type().map_err(|e| Error::io("lstat entry", e))?;

        if file_type.is_dir() {
            path_stack.push(name_str.clone());
            let child_meta = dir.symlink_metadata(&name_str).map_err(|e| Error::io("lstat dir entry", e))?;
            let child_info = FileInfo {
                file_type: FileType::Regular,
                uid: child_meta.uid(),
                gid: child_meta.gid(),
                mode: child_meta.mode(),
                symlink_target: None,
            };
            let (verdict, _) = apply_filter(modifier, path_stack, &child_info);
            if verdict == FilterVerdict::Skip {
                path_stack.pop();
                continue;
            }
            let child_dir = dir.open_dir(&name).map_err(|e| Error::io("opendir child", e))?;
            let child = mtree.ensure_dir(&name_str)?;
            ingest(repo, cancel, IngestSource::Directory(&child_dir), child, modifier, path_stack)?;
            path_stack.pop();
            continue;
        }

        if file_type.is_file() {
            ingest_regular_file(repo, cancel, dir, &name_str, modifier, path_stack, mtree)?;
        } else if file_type.is_symlink() {
            ingest_symlink(repo, cancel, dir, &name_str, modifier, path_stack, mtree)?;
        } else {
            path_stack.push(name_str.clone());
            let offending = crate::modifier::render_path(path_stack);
            path_stack.pop();
            return Err(Error::UnsupportedFileType {
                path: offending.into(),
            });
        }
    }
    Ok(())
}

/// Build and write this directory's own `DIR_META` object. The filter is
/// consulted here too: [`FileInfo::file_type`] is a meaningless placeholder
/// for directories (C4 only ever writes content objects for files/symlinks),
/// the callback only ever sees/edits uid/gid/mode.
fn write_own_dirmeta(
    repo: &Repo,
    cancel: &CancelHandle,
    dir: &Dir,
    modifier: Option<&CommitModifier>,
    path_stack: &[String],
    mtree: &mut MutableTree,
) -> Result<()> {
    let meta = dir.dir_metadata().map_err(|e| Error::io("fstat dir", e))?;
    let info = FileInfo {
        file_type: FileType::Regular,
        uid: meta.uid(),
        gid: meta.gid(),
        mode: meta.mode(),
        symlink_target: None,
    };
    let (_verdict, info) = apply_filter(modifier, path_stack, &info);

    let xattrs = gather_xattrs(dir, modifier)?;
    let data = crate::variant::encode_dirmeta(info.uid, info.gid, info.mode, &xattrs);
    let checksum = repo.write_metadata(cancel, ObjectType::DirMeta, &data)?;
    mtree.set_metadata_checksum(checksum);
    Ok(())
}

fn gather_xattrs(fd: impl rustix::fd::AsFd, modifier: Option<&CommitModifier>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    if modifier.map(|m| m.flags().skip_xattrs).unwrap_or(false) {
        return Ok(Vec::new());
    }
    crate::xattrs::list_xattrs(fd)
}

fn ingest_regular_file(
    repo: &Repo,
    cancel: &CancelHandle,
    dir: &Dir,
    name: &str,
    modifier: Option<&CommitModifier>,
    path_stack: &mut Vec<String>,
    mtree: &mut MutableTree,
) -> Result<()> {
    let meta = dir.symlink_metadata(name).map_err(|e| Error::io("lstat file", e))?;
    let raw_info = FileInfo {
        file_type: FileType::Regular,
        uid: meta.uid(),
        gid: meta.gid(),
        mode: meta.mode(),
        symlink_target: None,
    };

    path_stack.push(name.to_string());
    let (verdict, info) = apply_filter(modifier, path_stack, &raw_info);
    if verdict == FilterVerdict::Skip {
        path_stack.pop();
        return Ok(());
    }

    let checksum = if let Some(checksum) = repo.devino_lookup(meta.dev(), meta.ino())? {
        repo.write_content_trusted(cancel, checksum, &info, &[], None, meta.len())?
    } else {
        let mut file = dir.open(name).map_err(|e| Error::io("open file", e))?;
        let xattrs = gather_xattrs(&file, modifier)?;
        repo.write_content(cancel, &info, &xattrs, Some(&mut file), meta.len())?
    };

    mtree.replace_file(name, checksum)?;
    path_stack.pop();
    Ok(())
}

fn ingest_symlink(
    repo: &Repo,
    cancel: &CancelHandle,
    dir: &Dir,
    name: &str,
    modifier: Option<&CommitModifier>,
    path_stack: &mut Vec<String>,
    mtree: &mut MutableTree,
) -> Result<()> {
    let meta = dir.symlink_metadata(name).map_err(|e| Error::io("lstat symlink", e))?;
    let target = dir.read_link_contents(name).map_err(|e| Error::io("readlink", e))?;
    let target = target
        .to_str()
        .ok_or_else(|| Error::io("readlink", std::io::Error::other("non-UTF8 symlink target")))?
        .to_string();

    let raw_info = FileInfo {
        file_type: FileType::Symlink,
        uid: meta.uid(),
        gid: meta.gid(),
        mode: meta.mode(),
        symlink_target: Some(target),
    };

    path_stack.push(name.to_string());
    let (verdict, info) = apply_filter(modifier, path_stack, &raw_info);
    if verdict == FilterVerdict::Skip {
        path_stack.pop();
        return Ok(());
    }

    // Bare-mode symlinks never carry xattrs (see the writer's own note);
    // skip gathering them rather than collecting bytes that can't be applied.
    let checksum = if let Some(checksum) = repo.devino_lookup(meta.dev(), meta.ino())? {
        repo.write_content_trusted(cancel, checksum, &info, &[], None, 0)?
    } else {
        repo.write_content(cancel, &info, &[], None, 0)?
    };

    mtree.replace_file(name, checksum)?;
    path_stack.pop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::RepoMode;
    use cap_std_ext::{cap_std, cap_tempfile};

    fn src_dir() -> (cap_tempfile::TempDir, Dir) {
        let td = cap_tempfile::tempdir(cap_std::ambient_authority()).unwrap();
        let dir = Dir::reopen_dir(&td).unwrap();
        (td, dir)
    }

    #[test]
    fn ingest_single_file_and_commit_tree() {
        let (_td, src) = src_dir();
        src.write("hello.txt", b"hello world").unwrap();

        let repo_td = tempfile::tempdir().unwrap();
        let repo = Repo::init(&repo_td.path().join("repo"), RepoMode::Bare).unwrap();
        repo.prepare_transaction().unwrap();
        let cancel = CancelHandle::never();

        let mut mtree = MutableTree::new();
        write_directory_to_mtree(&repo, &cancel, IngestSource::Directory(&src), &mut mtree, None).unwrap();

        assert_eq!(mtree.get_files().len(), 1);
        assert!(mtree.get_metadata_checksum().is_some());
        let csum = crate::mtree::write_mtree(&repo, &cancel, &mut mtree).unwrap();
        assert!(repo.has_object(&csum, ObjectType::DirTree).unwrap().0);
    }

    #[test]
    fn ingest_nested_directory() {
        let (_td, src) = src_dir();
        src.create_dir("sub").unwrap();
        src.write("sub/a.txt", b"a").unwrap();

        let repo_td = tempfile::tempdir().unwrap();
        let repo = Repo::init(&repo_td.path().join("repo"), RepoMode::Bare).unwrap();
        repo.prepare_transaction().unwrap();
        let cancel = CancelHandle::never();

        let mut mtree = MutableTree::new();
        write_directory_to_mtree(&repo, &cancel, IngestSource::Directory(&src), &mut mtree, None).unwrap();

        assert_eq!(mtree.get_subdirs().len(), 1);
        let sub = mtree.get_subdirs().get("sub").unwrap();
        assert_eq!(sub.get_files().len(), 1);
    }

    #[test]
    fn filter_skips_named_path() {
        let (_td, src) = src_dir();
        src.write("keep.txt", b"keep").unwrap();
        src.write("drop.txt", b"drop").unwrap();

        let repo_td = tempfile::tempdir().unwrap();
        let repo = Repo::init(&repo_td.path().join("repo"), RepoMode::Bare).unwrap();
        repo.prepare_transaction().unwrap();
        let cancel = CancelHandle::never();

        let modifier = CommitModifier::with_filter(Default::default(), |path, _info| {
            if path == "/drop.txt" {
                FilterVerdict::Skip
            } else {
                FilterVerdict::Allow
            }
        });

        let mut mtree = MutableTree::new();
        write_directory_to_mtree(&repo, &cancel, IngestSource::Directory(&src), &mut mtree, Some(&modifier)).unwrap();

        assert!(mtree.get_files().contains_key("keep.txt"));
        assert!(!mtree.get_files().contains_key("drop.txt"));
    }

    #[test]
    fn filter_skips_named_subdirectory_and_its_contents() {
        let (_td, src) = src_dir();
        src.create_dir("keep").unwrap();
        src.write("keep/a.txt", b"a").unwrap();
        src.create_dir("drop").unwrap();
        src.write("drop/b.txt", b"b").unwrap();

        let repo_td = tempfile::tempdir().unwrap();
        let repo = Repo::init(&repo_td.path().join("repo"), RepoMode::Bare).unwrap();
        repo.prepare_transaction().unwrap();
        let cancel = CancelHandle::never();

        let modifier = CommitModifier::with_filter(Default::default(), |path, _info| {
            if path == "/drop" {
                FilterVerdict::Skip
            } else {
                FilterVerdict::Allow
            }
        });

        let mut mtree = MutableTree::new();
        write_directory_to_mtree(&repo, &cancel, IngestSource::Directory(&src), &mut mtree, Some(&modifier)).unwrap();

        assert!(mtree.get_subdirs().contains_key("keep"));
        assert!(!mtree.get_subdirs().contains_key("drop"));
    }

    #[test]
    fn already_committed_shortcut_skips_walk() {
        let repo_td = tempfile::tempdir().unwrap();
        let repo = Repo::init(&repo_td.path().join("repo"), RepoMode::Bare).unwrap();
        repo.prepare_transaction().unwrap();
        let cancel = CancelHandle::never();

        let contents = ObjectChecksum([3u8; 32]);
        let metadata = ObjectChecksum([4u8; 32]);
        let mut mtree = MutableTree::new();
        write_directory_to_mtree(
            &repo,
            &cancel,
            IngestSource::AlreadyCommitted { contents, metadata },
            &mut mtree,
            None,
        )
        .unwrap();

        assert_eq!(mtree.get_contents_checksum(), Some(contents));
        assert_eq!(mtree.get_metadata_checksum(), Some(metadata));
    }
}

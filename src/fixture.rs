//! Test suite fixture (A5). Should only be used by this library's own tests.

#![allow(missing_docs)]

use crate::checksum::{ObjectChecksum, ObjectType};
use crate::mtree::{write_mtree, MutableTree};
use crate::repo::{Repo, RepoMode};
use crate::transaction::CancelHandle;
use crate::writer::{FileInfo, FileType};
use anyhow::{anyhow, Result};
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use std::borrow::Cow;
use std::io::Cursor;

#[derive(Debug)]
enum FileDefType {
    Regular(Cow<'static, str>),
    Symlink(Cow<'static, Utf8Path>),
    Directory,
}

#[derive(Debug)]
pub struct FileDef {
    uid: u32,
    gid: u32,
    mode: u32,
    path: Cow<'static, Utf8Path>,
    ty: FileDefType,
}

impl TryFrom<&'static str> for FileDef {
    type Error = anyhow::Error;

    fn try_from(value: &'static str) -> Result<Self, Self::Error> {
        let mut parts = value.split(' ');
        let tydef = parts.next().ok_or_else(|| anyhow!("Missing type definition"))?;
        let name = parts.next().ok_or_else(|| anyhow!("Missing file name"))?;
        let contents = parts.next();
        let contents = move || contents.ok_or_else(|| anyhow!("Missing file contents: {}", value));
        if parts.next().is_some() {
            anyhow::bail!("Invalid filedef: {}", value);
        }
        let ty = match tydef {
            "r" => FileDefType::Regular(contents()?.into()),
            "l" => FileDefType::Symlink(Cow::Borrowed(contents()?.into())),
            "d" => FileDefType::Directory,
            _ => anyhow::bail!("Invalid filedef type: {}", value),
        };
        Ok(FileDef {
            uid: 0,
            gid: 0,
            mode: 0o644,
            path: Cow::Borrowed(name.into()),
            ty,
        })
    }
}

fn parse_mode(line: &str) -> Result<(u32, u32, u32)> {
    let mut parts = line.split(' ').skip(1);
    // An empty mode resets to defaults
    let uid = if let Some(u) = parts.next() {
        u
    } else {
        return Ok((0, 0, 0o644));
    };
    let gid = parts.next().ok_or_else(|| anyhow!("Missing gid"))?;
    let mode = parts.next().ok_or_else(|| anyhow!("Missing mode"))?;
    if parts.next().is_some() {
        anyhow::bail!("Invalid mode: {}", line);
    }
    Ok((uid.parse()?, gid.parse()?, u32::from_str_radix(mode, 8)?))
}

impl FileDef {
    /// Parse a list of newline-separated file definitions.
    pub fn iter_from(defs: &'static str) -> impl Iterator<Item = Result<FileDef>> {
        let mut uid = 0;
        let mut gid = 0;
        let mut mode = 0o644;
        defs.lines()
            .filter(|v| !(v.is_empty() || v.starts_with('#')))
            .filter_map(move |line| {
                if line.starts_with('m') {
                    match parse_mode(line) {
                        Ok(r) => {
                            uid = r.0;
                            gid = r.1;
                            mode = r.2;
                            None
                        }
                        Err(e) => Some(Err(e)),
                    }
                } else {
                    Some(FileDef::try_from(line).map(|mut def| {
                        def.uid = uid;
                        def.gid = gid;
                        def.mode = mode;
                        def
                    }))
                }
            })
    }
}

/// A representative tree: a couple of "packages" worth of files, a pair of
/// entries with identical content (exercising dedup), and some bare
/// directories at a few different modes.
pub static CONTENTS_V0: &str = indoc::indoc! { r##"
r usr/lib/modules/5.10.18-200.x86_64/vmlinuz this-is-a-kernel
r usr/lib/modules/5.10.18-200.x86_64/initramfs this-is-an-initramfs
m 0 0 755
r usr/bin/bash the-bash-shell
l usr/bin/sh bash
m 0 0 644
# Should be the same object
r usr/bin/hardlink-a testlink
r usr/bin/hardlink-b testlink
r usr/etc/someconfig.conf someconfig
m 10 10 644
r usr/etc/polkit.conf a-polkit-config
m
d boot
d run
m 0 0 1755
d tmp
"## };

fn relative_path_components(p: &Utf8Path) -> impl Iterator<Item = &str> {
    p.components().filter_map(|c| match c {
        Utf8Component::Normal(name) => Some(name),
        _ => None,
    })
}

fn ensure_parent_dirs<'a>(mut node: &'a mut MutableTree, path: &Utf8Path) -> Result<&'a mut MutableTree> {
    let Some(parent) = path.parent() else {
        return Ok(node);
    };
    for name in relative_path_components(parent) {
        node = node.ensure_dir(name)?;
    }
    Ok(node)
}

fn dirmeta_checksum(repo: &Repo, cancel: &CancelHandle, uid: u32, gid: u32, mode: u32) -> Result<ObjectChecksum> {
    let data = crate::variant::encode_dirmeta(uid, gid, mode, &[]);
    Ok(repo.write_metadata(cancel, ObjectType::DirMeta, &data)?)
}

/// An initialized bare repo plus the cancel handle its tests pass around,
/// with helpers for staging a [`FileDef`] list directly against a
/// [`MutableTree`] — no filesystem round-trip, mirroring how the teacher's
/// own fixture builds trees straight out of its `MutableTree` bindings
/// rather than materializing a source directory on disk.
#[derive(Debug)]
pub struct Fixture {
    _tempdir: tempfile::TempDir,
    pub repo: Repo,
    pub cancel: CancelHandle,
}

impl Fixture {
    /// A fresh bare repo with a transaction already open.
    pub fn new_base() -> Result<Self> {
        let tempdir = tempfile::tempdir()?;
        let repo = Repo::init(&tempdir.path().join("repo"), RepoMode::Bare)?;
        repo.prepare_transaction()?;
        Ok(Self {
            _tempdir: tempdir,
            repo,
            cancel: CancelHandle::never(),
        })
    }

    /// Stage one [`FileDef`] into `root`, creating any missing parent
    /// directories (with default ownership/mode) along the way.
    pub fn write_filedef(&self, root: &mut MutableTree, def: &FileDef) -> Result<()> {
        let parent = ensure_parent_dirs(root, &def.path)?;
        let name = def
            .path
            .file_name()
            .ok_or_else(|| anyhow!("filedef path {:?} has no file name", def.path))?;
        match &def.ty {
            FileDefType::Regular(contents) => {
                let info = FileInfo {
                    file_type: FileType::Regular,
                    uid: def.uid,
                    gid: def.gid,
                    mode: 0o100000 | def.mode,
                    symlink_target: None,
                };
                let mut reader = Cursor::new(contents.as_bytes().to_vec());
                let checksum = self
                    .repo
                    .write_content(&self.cancel, &info, &[], Some(&mut reader), contents.len() as u64)?;
                parent.replace_file(name, checksum)?;
            }
            FileDefType::Symlink(target) => {
                let info = FileInfo {
                    file_type: FileType::Symlink,
                    uid: def.uid,
                    gid: def.gid,
                    mode: 0o120000 | def.mode,
                    symlink_target: Some(target.to_string()),
                };
                let checksum = self.repo.write_content(&self.cancel, &info, &[], None, 0)?;
                parent.replace_file(name, checksum)?;
            }
            FileDefType::Directory => {
                let child = parent.ensure_dir(name)?;
                if child.get_metadata_checksum().is_none() {
                    let checksum = dirmeta_checksum(&self.repo, &self.cancel, def.uid, def.gid, 0o040000 | def.mode)?;
                    child.set_metadata_checksum(checksum);
                }
            }
        }
        Ok(())
    }

    /// Stage every def in `defs` under a fresh root, write the resulting
    /// dirtree, and commit it to `branch`.
    pub fn commit_filedefs(
        &self,
        defs: impl IntoIterator<Item = Result<FileDef>>,
        branch: &str,
    ) -> Result<ObjectChecksum> {
        let mut root = MutableTree::new();
        let root_meta = dirmeta_checksum(&self.repo, &self.cancel, 0, 0, 0o040755)?;
        root.set_metadata_checksum(root_meta);
        for def in defs {
            self.write_filedef(&mut root, &def?)?;
        }
        let root_contents = write_mtree(&self.repo, &self.cancel, &mut root)?;
        let commit = self
            .repo
            .write_commit(&self.cancel, branch, None, "test commit", "", root_contents, root_meta)?;
        self.repo.transaction_set_ref(branch, Some(commit))?;
        Ok(commit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filedef_parses_basic_lines() {
        let def = FileDef::try_from("r usr/bin/bash the-bash-shell").unwrap();
        assert_eq!(def.path.as_str(), "usr/bin/bash");
        assert!(matches!(def.ty, FileDefType::Regular(_)));
    }

    #[test]
    fn iter_from_applies_mode_resets() {
        let defs: Vec<_> = FileDef::iter_from(CONTENTS_V0).collect::<Result<_>>().unwrap();
        let bash = defs.iter().find(|d| d.path.as_str() == "usr/bin/bash").unwrap();
        assert_eq!(bash.mode, 0o755);
        let someconfig = defs.iter().find(|d| d.path.as_str() == "usr/etc/someconfig.conf").unwrap();
        assert_eq!(someconfig.mode, 0o644);
    }

    #[test]
    fn commit_filedefs_dedupes_identical_content() {
        let fixture = Fixture::new_base().unwrap();
        let commit = fixture
            .commit_filedefs(FileDef::iter_from(CONTENTS_V0), "refs/heads/main")
            .unwrap();
        assert!(fixture.repo.has_object(&commit, ObjectType::Commit).unwrap().0);

        let mut root = MutableTree::new();
        for def in FileDef::iter_from(CONTENTS_V0) {
            fixture.write_filedef(&mut root, &def.unwrap()).unwrap();
        }
        let hardlink_a = *root
            .get_subdirs()
            .get("usr")
            .unwrap()
            .get_subdirs()
            .get("bin")
            .unwrap()
            .get_files()
            .get("hardlink-a")
            .unwrap();
        let hardlink_b = *root
            .get_subdirs()
            .get("usr")
            .unwrap()
            .get_subdirs()
            .get("bin")
            .unwrap()
            .get_files()
            .get("hardlink-b")
            .unwrap();
        assert_eq!(hardlink_a, hardlink_b);
    }
}

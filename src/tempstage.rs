//! Temp-file staging (C3). Content and metadata are always written to a
//! freshly named file (or symlink) under `tmp/` before being hashed; the
//! guard here unlinks that name on any early return so a failed write never
//! leaves garbage behind, mirroring the teacher's `atomic_replace_labeled`
//! temp-then-rename shape (`lib/src/lsm.rs`) but against a caller-chosen
//! final name rather than `cap_std_ext`'s own atomic-replace temp naming.

use crate::error::{Error, Result};
use cap_std::fs::Dir;
use cap_std_ext::cap_std;
use rustix::fd::AsFd;
use rustix::fs::{Mode, OFlags};
use std::fs::File;
use std::sync::atomic::{AtomicU64, Ordering};

/// Retries before giving up on finding an unused temp name (§4.1).
const MAX_NAME_ATTEMPTS: u32 = 128;

static NAME_COUNTER: AtomicU64 = AtomicU64::new(0);

fn random_name() -> String {
    let counter = NAME_COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!(".tmp-{}-{nanos:x}-{counter:x}", std::process::id())
}

/// A name staged under `tmp/`, unlinked on drop unless installed.
///
/// `name` is `Some` until [`TempStage::into_name`] hands it off to the
/// install step (§4.3), which takes over its lifetime via `renameat`.
#[derive(Debug)]
pub(crate) struct TempStage<'a> {
    tmp_dir: &'a Dir,
    name: Option<String>,
}

impl<'a> TempStage<'a> {
    /// Create a regular file under `tmp/` with `mode`, retrying with a fresh
    /// random name on `EEXIST`.
    pub(crate) fn create_regular(tmp_dir: &'a Dir, mode: u32) -> Result<(Self, File)> {
        for _ in 0..MAX_NAME_ATTEMPTS {
            let name = random_name();
            let oflags = OFlags::CREATE | OFlags::EXCL | OFlags::WRONLY | OFlags::CLOEXEC;
            match rustix::fs::openat(tmp_dir.as_fd(), name.as_str(), oflags, Mode::from_raw_mode(mode)) {
                Ok(fd) => {
                    return Ok((
                        TempStage {
                            tmp_dir,
                            name: Some(name),
                        },
                        File::from(fd),
                    ))
                }
                Err(rustix::io::Errno::EXIST) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::Exhausted)
    }

    /// Create a symlink under `tmp/` pointing at `target`, with the same
    /// retry-on-collision policy (§4.1, bare-mode symlinks).
    pub(crate) fn create_symlink(tmp_dir: &'a Dir, target: &str) -> Result<Self> {
        for _ in 0..MAX_NAME_ATTEMPTS {
            let name = random_name();
            match rustix::fs::symlinkat(target, tmp_dir.as_fd(), name.as_str()) {
                Ok(()) => {
                    return Ok(TempStage {
                        tmp_dir,
                        name: Some(name),
                    })
                }
                Err(rustix::io::Errno::EXIST) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::Exhausted)
    }

    /// The current temp name, for fd-relative `fchownat`/`setxattr`/`fchmod`
    /// calls made before install.
    pub(crate) fn name(&self) -> &str {
        self.name.as_deref().expect("temp name present before install")
    }

    pub(crate) fn tmp_dir(&self) -> &Dir {
        self.tmp_dir
    }

    /// Hand the name off to the install step without unlinking it.
    pub(crate) fn into_name(mut self) -> String {
        self.name.take().expect("temp name already taken")
    }
}

impl Drop for TempStage<'_> {
    fn drop(&mut self) {
        if let Some(name) = self.name.take() {
            let _ = self.tmp_dir.remove_file(&name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cap_std_ext::{cap_std, cap_tempfile};

    #[test]
    fn drop_without_install_removes_tempfile() {
        let td = cap_tempfile::tempdir(cap_std::ambient_authority()).unwrap();
        let name = {
            let (stage, _file) = TempStage::create_regular(&td, 0o644).unwrap();
            stage.name().to_string()
        };
        assert!(!td.try_exists(&name).unwrap());
    }

    #[test]
    fn into_name_survives_drop() {
        let td = cap_tempfile::tempdir(cap_std::ambient_authority()).unwrap();
        let (stage, _file) = TempStage::create_regular(&td, 0o644).unwrap();
        let name = stage.into_name();
        assert!(td.try_exists(&name).unwrap());
    }
}

//! Reading and writing extended attributes on loose objects.
//!
//! Mirrors the `a(ayay)` shape the real on-disk format gives xattr lists
//! (see [`crate::variant::encode_xattrs`]), built over `rustix` rather than
//! raw `libc` + glib the way the teacher's `ima.rs` does it.

use crate::error::{Error, Result};
use rustix::fd::AsFd;
use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;

/// List and read every extended attribute on an open file descriptor.
pub fn list_xattrs(fd: impl AsFd) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let fd = fd.as_fd();
    let names = match list_names(fd) {
        Ok(names) => names,
        Err(Error::Io { source, .. })
            if source.raw_os_error() == Some(rustix::io::Errno::NOTSUP.raw_os_error() as i32) =>
        {
            return Ok(Vec::new())
        }
        Err(e) => return Err(e),
    };
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        match get_xattr(fd, &name) {
            Ok(value) => out.push((name.into_vec(), value)),
            // The attribute could have been removed concurrently; skip it.
            Err(Error::Io { source, .. }) if source.raw_os_error() == Some(rustix::io::Errno::NODATA.raw_os_error() as i32) => {
                continue
            }
            Err(e) => return Err(e),
        }
    }
    out.sort();
    Ok(out)
}

fn list_names(fd: impl AsFd) -> Result<Vec<OsString>> {
    let fd = fd.as_fd();
    let mut buf = vec![0u8; 4096];
    loop {
        match rustix::fs::listxattr(fd, &mut buf) {
            Ok(n) => {
                buf.truncate(n);
                break;
            }
            Err(rustix::io::Errno::RANGE) => {
                buf.resize(buf.len() * 2, 0);
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(buf
        .split(|b| *b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| OsString::from_vec(s.to_vec()))
        .collect())
}

fn get_xattr(fd: impl AsFd, name: &OsString) -> Result<Vec<u8>> {
    let fd = fd.as_fd();
    let mut buf = vec![0u8; 4096];
    loop {
        match rustix::fs::getxattr(fd, name, &mut buf) {
            Ok(n) => {
                buf.truncate(n);
                return Ok(buf);
            }
            Err(rustix::io::Errno::RANGE) => {
                buf.resize(buf.len() * 2, 0);
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Apply a previously-captured xattr list to a newly-created object.
///
/// Errors from individual `setxattr` calls are propagated — a partially
/// labeled object is a correctness bug, not something to paper over.
pub fn set_xattrs(fd: impl AsFd, xattrs: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
    let fd = fd.as_fd();
    for (name, value) in xattrs {
        rustix::fs::setxattr(
            fd,
            std::ffi::OsStr::new(std::str::from_utf8(name).unwrap_or_default()),
            value,
            rustix::fs::XattrFlags::empty(),
        )
        .map_err(Error::from)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn roundtrip_xattr_on_tempfile() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hi").unwrap();
        let set_result = rustix::fs::setxattr(
            f.as_file(),
            std::ffi::OsStr::new("user.test"),
            b"value",
            rustix::fs::XattrFlags::empty(),
        );
        // Not every test filesystem (e.g. tmpfs without xattr support, or
        // overlayfs in CI) allows user xattrs; skip gracefully rather than
        // asserting a hard failure unrelated to this module's logic.
        if set_result.is_err() {
            return;
        }
        let xattrs = list_xattrs(f.as_file()).unwrap();
        assert!(xattrs.iter().any(|(k, v)| k == b"user.test" && v == b"value"));
    }
}

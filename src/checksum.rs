//! Object identifiers and the fanout path policy (C1).

use camino::Utf8PathBuf;
use std::fmt;
use std::str::FromStr;

/// A SHA-256 object identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectChecksum(pub [u8; 32]);

impl ObjectChecksum {
    /// Compute the checksum of a byte slice directly (used for dirmeta/commit
    /// objects whose serialization is already fully materialized).
    pub fn of_bytes(buf: &[u8]) -> Self {
        let digest = openssl::sha::sha256(buf);
        ObjectChecksum(digest)
    }

    /// The two-character fanout prefix, lowercase hex.
    pub fn fanout(&self) -> String {
        hex::encode(&self.0[0..1])
    }

    /// The remaining 62 hex characters after the fanout prefix.
    pub fn rest(&self) -> String {
        hex::encode(&self.0[1..32])
    }
}

impl fmt::Display for ObjectChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ObjectChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectChecksum({self})")
    }
}

impl FromStr for ObjectChecksum {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let v = hex::decode(s)?;
        let arr: [u8; 32] = v
            .try_into()
            .map_err(|v: Vec<u8>| anyhow::anyhow!("expected 32 bytes, got {}", v.len()))?;
        Ok(ObjectChecksum(arr))
    }
}

/// The four object kinds this store persists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectType {
    /// The root pointer object: parent, timestamp, subject, root tree/meta.
    Commit,
    /// A directory's recursive manifest.
    DirTree,
    /// A directory's ownership/mode/xattrs.
    DirMeta,
    /// A regular file or symlink plus metadata.
    File,
}

impl ObjectType {
    /// Whether this object kind carries bulk content (as opposed to small metadata).
    pub fn is_content(self) -> bool {
        matches!(self, ObjectType::File)
    }

    /// The on-disk suffix for this object kind under the given repository mode.
    pub fn suffix(self, mode: crate::repo::RepoMode) -> &'static str {
        use crate::repo::RepoMode;
        match (self, mode) {
            (ObjectType::Commit, _) => "commit",
            (ObjectType::DirTree, _) => "dirtree",
            (ObjectType::DirMeta, _) => "dirmeta",
            (ObjectType::File, RepoMode::Bare) => "file",
            (ObjectType::File, RepoMode::ArchiveZ2) => "filez",
        }
    }
}

/// Compute the canonical on-disk relative path `objects/<aa>/<rest>.<suffix>`
/// for a checksum/objtype/mode triple.
pub fn object_relpath(
    checksum: &ObjectChecksum,
    objtype: ObjectType,
    mode: crate::repo::RepoMode,
) -> Utf8PathBuf {
    Utf8PathBuf::from(format!(
        "{}/{}.{}",
        checksum.fanout(),
        checksum.rest(),
        objtype.suffix(mode)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::RepoMode;

    #[test]
    fn roundtrip_hex() {
        let csum = ObjectChecksum::of_bytes(b"hello world");
        let s = csum.to_string();
        assert_eq!(s.len(), 64);
        let parsed: ObjectChecksum = s.parse().unwrap();
        assert_eq!(csum, parsed);
    }

    #[test]
    fn relpath_shape() {
        let csum = ObjectChecksum([0xabu8; 32]);
        let p = object_relpath(&csum, ObjectType::File, RepoMode::Bare);
        assert_eq!(p.as_str(), format!("ab/{}.file", "ab".repeat(31)));
        let p = object_relpath(&csum, ObjectType::File, RepoMode::ArchiveZ2);
        assert!(p.as_str().ends_with(".filez"));
    }
}

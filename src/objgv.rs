//! Type signatures for the two metadata variants this engine writes.
//!
//! These are documented as compile-time-checked GVariant type markers, the
//! same way the upstream project pins them down, even though this crate's
//! own encoder (see [`crate::variant`]) writes the bytes by hand rather than
//! going through the `gvariant` crate's general-purpose machinery.

/// Type representing a commit object: `(metadata, parent, related, subject,
/// body, timestamp, root_contents, root_metadata)`.
macro_rules! gv_commit {
    () => {
        gvariant::gv!("(a{sv}aya(say)sstayay)")
    };
}
pub(crate) use gv_commit;

/// Type representing a DIR_TREE object: `(files, subdirs)`.
macro_rules! gv_dirtree {
    () => {
        gvariant::gv!("(a(say)a(sayay))")
    };
}
pub(crate) use gv_dirtree;

#[cfg(test)]
mod tests {
    use gvariant::aligned_bytes::TryAsAligned;
    use gvariant::Marker;

    use super::*;

    #[test]
    fn test_dirtree_signature_compiles() {
        let data = b"".try_as_aligned().ok();
        if let Some(data) = data {
            let _t = gv_dirtree!().cast(data);
        }
    }

    #[test]
    fn test_commit_signature_compiles() {
        let data = b"".try_as_aligned().ok();
        if let Some(data) = data {
            let _t = gv_commit!().cast(data);
        }
    }
}

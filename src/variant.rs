//! A minimal GVariant-subset encoder.
//!
//! This crate only ever *writes* two fixed type signatures — the `COMMIT`
//! and `DIR_TREE` shapes documented in [`crate::objgv`] — so rather than
//! pulling in a full codec this implements just the framing rules those two
//! signatures need: fixed-size leaves, `NUL`-terminated strings, raw byte
//! arrays, and the offset-table framing GVariant uses for arrays and tuples
//! whose members aren't all fixed-size. Every fixed integer we emit
//! (framing offsets, and the explicitly big-endian commit timestamp) is
//! written in a single, deterministic byte order so two processes on
//! different architectures produce byte-identical objects, per spec.

use crate::checksum::ObjectChecksum;

/// A value being assembled for serialization.
enum GVValue {
    Str(String),
    Bytes(Vec<u8>),
    /// A big-endian-encoded 8-byte integer (used only for the commit timestamp).
    U64Be(u64),
    /// `a{sv}`, always empty in this engine (no commit metadata is ever attached).
    EmptyMetadataDict,
    /// `a(say)`, always empty (the "related commits" array is never populated).
    EmptyRelatedArray,
    Tuple(Vec<GVValue>),
    /// An array whose elements are themselves [`GVValue::Tuple`] values.
    ArrayOfTuples(Vec<GVValue>),
}

impl GVValue {
    fn alignment(&self) -> usize {
        match self {
            GVValue::Str(_) | GVValue::Bytes(_) | GVValue::EmptyRelatedArray => 1,
            GVValue::U64Be(_) => 8,
            GVValue::EmptyMetadataDict => 8,
            GVValue::Tuple(members) => members.iter().map(GVValue::alignment).max().unwrap_or(1),
            GVValue::ArrayOfTuples(elems) => elems
                .first()
                .map(GVValue::alignment)
                .unwrap_or(1),
        }
    }

    /// Whether this value's serialized length is constant regardless of its contents.
    fn is_fixed_size(&self) -> bool {
        matches!(self, GVValue::U64Be(_))
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        match self {
            GVValue::Str(s) => {
                out.extend_from_slice(s.as_bytes());
                out.push(0);
            }
            GVValue::Bytes(b) => out.extend_from_slice(b),
            GVValue::U64Be(v) => out.extend_from_slice(&v.to_be_bytes()),
            GVValue::EmptyMetadataDict | GVValue::EmptyRelatedArray => {}
            GVValue::Tuple(members) => encode_tuple(members, out),
            GVValue::ArrayOfTuples(elems) => encode_array(elems, out),
        }
    }
}

fn pad_to(out: &mut Vec<u8>, align: usize) {
    let rem = out.len() % align;
    if rem != 0 {
        out.resize(out.len() + (align - rem), 0);
    }
}

/// Pick the narrowest offset width (1/2/4/8 bytes) that can address every
/// byte of a container whose body is `body_len` bytes and which needs `n`
/// trailing offsets.
fn offset_size_for(body_len: usize, n: usize) -> usize {
    for size in [1usize, 2, 4] {
        let max_value: u64 = (1u64 << (8 * size)) - 1;
        let total = body_len as u64 + (n * size) as u64;
        if total <= max_value {
            return size;
        }
    }
    8
}

fn write_uint(out: &mut Vec<u8>, value: u64, size: usize) {
    let bytes = value.to_le_bytes();
    out.extend_from_slice(&bytes[0..size]);
}

fn encode_tuple(members: &[GVValue], out: &mut Vec<u8>) {
    let start = out.len();
    let mut end_offsets = Vec::new();
    for (i, m) in members.iter().enumerate() {
        pad_to(out, m.alignment());
        m.encode_body(out);
        if i != members.len() - 1 && !m.is_fixed_size() {
            end_offsets.push(out.len() - start);
        }
    }
    if !end_offsets.is_empty() {
        let body_len = out.len() - start;
        let osize = offset_size_for(body_len, end_offsets.len());
        for off in end_offsets.iter().rev() {
            write_uint(out, *off as u64, osize);
        }
    }
}

fn encode_array(elems: &[GVValue], out: &mut Vec<u8>) {
    let start = out.len();
    let mut end_offsets = Vec::new();
    for e in elems {
        pad_to(out, e.alignment());
        e.encode_body(out);
        end_offsets.push(out.len() - start);
    }
    if !elems.is_empty() {
        let body_len = out.len() - start;
        let osize = offset_size_for(body_len, end_offsets.len());
        for off in end_offsets.iter().rev() {
            write_uint(out, *off as u64, osize);
        }
    }
}

fn encode_toplevel(v: GVValue) -> Vec<u8> {
    let mut out = Vec::new();
    v.encode_body(&mut out);
    out
}

/// A single `(name, checksum)` entry as found in a `DIR_TREE`'s file list.
pub struct FileEntry<'a> {
    /// File name (single path component).
    pub name: &'a str,
    /// Content object checksum.
    pub checksum: ObjectChecksum,
}

/// A single `(name, contents_checksum, metadata_checksum)` entry as found
/// in a `DIR_TREE`'s subdirectory list.
pub struct SubdirEntry<'a> {
    /// Subdirectory name.
    pub name: &'a str,
    /// Checksum of that subdirectory's own `DIR_TREE` object.
    pub contents: ObjectChecksum,
    /// Checksum of that subdirectory's `DIR_META` object.
    pub metadata: ObjectChecksum,
}

/// Encode a `DIR_TREE` object: `(a(say) a(sayay))`. Both lists must already
/// be sorted ascending by name (`strcmp` order) by the caller — see
/// [`crate::mtree::write_mtree`].
pub fn encode_dirtree(files: &[FileEntry<'_>], subdirs: &[SubdirEntry<'_>]) -> Vec<u8> {
    let files = GVValue::ArrayOfTuples(
        files
            .iter()
            .map(|f| {
                GVValue::Tuple(vec![
                    GVValue::Str(f.name.to_string()),
                    GVValue::Bytes(f.checksum.0.to_vec()),
                ])
            })
            .collect(),
    );
    let subdirs = GVValue::ArrayOfTuples(
        subdirs
            .iter()
            .map(|d| {
                GVValue::Tuple(vec![
                    GVValue::Str(d.name.to_string()),
                    GVValue::Bytes(d.contents.0.to_vec()),
                    GVValue::Bytes(d.metadata.0.to_vec()),
                ])
            })
            .collect(),
    );
    encode_toplevel(GVValue::Tuple(vec![files, subdirs]))
}

/// Encode a `COMMIT` object: `(a{sv} ay a(say) s s t ay ay)`.
#[allow(clippy::too_many_arguments)]
pub fn encode_commit(
    parent: Option<ObjectChecksum>,
    subject: &str,
    body: &str,
    timestamp_utc_seconds: u64,
    root_contents: ObjectChecksum,
    root_metadata: ObjectChecksum,
) -> Vec<u8> {
    let parent_bytes = parent.map(|c| c.0.to_vec()).unwrap_or_default();
    encode_toplevel(GVValue::Tuple(vec![
        GVValue::EmptyMetadataDict,
        GVValue::Bytes(parent_bytes),
        GVValue::EmptyRelatedArray,
        GVValue::Str(subject.to_string()),
        GVValue::Str(body.to_string()),
        GVValue::U64Be(timestamp_utc_seconds),
        GVValue::Bytes(root_contents.0.to_vec()),
        GVValue::Bytes(root_metadata.0.to_vec()),
    ]))
}

/// Encode a `DIR_META` object: `(uid, gid, mode, xattrs)`. Spec.md notes
/// this object's codec is "produced by an external encoder" and that C4
/// only stores the already-encoded bytes; since nothing else in this crate
/// plays that role, this function stands in for it.
pub fn encode_dirmeta(uid: u32, gid: u32, mode: u32, xattrs: &[(Vec<u8>, Vec<u8>)]) -> Vec<u8> {
    encode_toplevel(GVValue::Tuple(vec![
        GVValue::U64Be(uid as u64),
        GVValue::U64Be(gid as u64),
        GVValue::U64Be(mode as u64),
        GVValue::Bytes(encode_xattrs(xattrs)),
    ]))
}

/// Encode the `a(ayay)` xattr list the real on-disk format uses, sorted by
/// key so the encoding (and hence the content-object checksum) is
/// deterministic. Used by [`crate::writer`] when building content/dirmeta
/// payloads.
pub fn encode_xattrs(xattrs: &[(Vec<u8>, Vec<u8>)]) -> Vec<u8> {
    let mut sorted = xattrs.to_vec();
    sorted.sort();
    let elems = GVValue::ArrayOfTuples(
        sorted
            .into_iter()
            .map(|(k, v)| GVValue::Tuple(vec![GVValue::Bytes(k), GVValue::Bytes(v)]))
            .collect(),
    );
    encode_toplevel(elems)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_dirtree_is_deterministic() {
        let a = encode_dirtree(&[], &[]);
        let b = encode_dirtree(&[], &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn dirtree_entries_affect_bytes() {
        let csum = ObjectChecksum([7u8; 32]);
        let with_file = encode_dirtree(&[FileEntry { name: "a", checksum: csum }], &[]);
        let empty = encode_dirtree(&[], &[]);
        assert_ne!(with_file, empty);
    }

    #[test]
    fn commit_encoding_is_deterministic_and_order_sensitive() {
        let root = ObjectChecksum([1u8; 32]);
        let meta = ObjectChecksum([2u8; 32]);
        let a = encode_commit(None, "init", "", 1000, root, meta);
        let b = encode_commit(None, "init", "", 1000, root, meta);
        assert_eq!(a, b);
        let c = encode_commit(None, "init", "", 1001, root, meta);
        assert_ne!(a, c);
    }

    #[test]
    fn xattrs_sorted_regardless_of_input_order() {
        let a = encode_xattrs(&[(b"b".to_vec(), b"2".to_vec()), (b"a".to_vec(), b"1".to_vec())]);
        let b = encode_xattrs(&[(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())]);
        assert_eq!(a, b);
    }
}

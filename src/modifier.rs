//! The commit modifier (C11): a shared, optional filter callback plus a
//! small set of ingest-wide flags, consulted once per logical path during
//! directory ingest (§4.8).
//!
//! The spec's `commit_modifier_new`/`ref`/`unref` surface is C-style manual
//! reference counting around a `(flags, filter_fn, user_data, destructor)`
//! bundle. Rust has no separate `user_data`/`destructor` slots to translate:
//! a closure captures whatever state it needs and drops it when nothing
//! references the closure anymore, so `Arc` cloning and its ordinary `Drop`
//! already give the same "last release runs the destructor" behavior (§9).

use crate::writer::FileInfo;
use std::sync::Arc;

/// Verdict a filter callback returns for one logical path (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    /// Ingest this entry normally.
    Allow,
    /// Omit this entry (and, for a directory, everything under it) from the tree.
    Skip,
}

/// Per-path filter signature: logical path plus a mutable copy of the entry's
/// metadata the callback may edit (uid/gid/mode) before it's written.
pub type FilterFn = dyn Fn(&str, &mut FileInfo) -> FilterVerdict + Send + Sync;

/// Flags controlling ingest-wide behavior, independent of any filter verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifierFlags {
    /// Never read or store xattrs for any entry this modifier applies to.
    pub skip_xattrs: bool,
}

struct Inner {
    flags: ModifierFlags,
    filter: Option<Box<FilterFn>>,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("flags", &self.flags)
            .field("filter", &self.filter.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

/// A shared, cheaply-cloned commit modifier. Ingest callers hold one
/// reference; cloning it (instead of the spec's `ref`) bumps the `Arc`
/// count, and the last clone's drop (instead of `unref`) runs it down to
/// zero and releases whatever the filter closure captured.
#[derive(Debug, Clone)]
pub struct CommitModifier {
    inner: Arc<Inner>,
}

impl CommitModifier {
    /// A modifier with no filter callback: ingest applies only `flags`.
    pub fn new(flags: ModifierFlags) -> Self {
        CommitModifier {
            inner: Arc::new(Inner { flags, filter: None }),
        }
    }

    /// A modifier that additionally invokes `filter` for every logical path.
    pub fn with_filter<F>(flags: ModifierFlags, filter: F) -> Self
    where
        F: Fn(&str, &mut FileInfo) -> FilterVerdict + Send + Sync + 'static,
    {
        CommitModifier {
            inner: Arc::new(Inner {
                flags,
                filter: Some(Box::new(filter)),
            }),
        }
    }

    pub fn flags(&self) -> ModifierFlags {
        self.inner.flags
    }
}

/// Render a path stack as `"/a/b/c"`, with the root directory as `"/"`
/// (§4.8).
pub(crate) fn render_path(path_stack: &[String]) -> String {
    if path_stack.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", path_stack.join("/"))
    }
}

/// Apply `modifier`'s filter (if any) to one entry. With no modifier or no
/// filter callback attached, returns `(Allow, info.clone())` without
/// invoking anything. Otherwise duplicates `info` into a copy the callback
/// may edit and returns its verdict alongside that copy; `info` itself is
/// never mutated (§4.8).
pub(crate) fn apply_filter(
    modifier: Option<&CommitModifier>,
    path_stack: &[String],
    info: &FileInfo,
) -> (FilterVerdict, FileInfo) {
    let Some(filter) = modifier.and_then(|m| m.inner.filter.as_deref()) else {
        return (FilterVerdict::Allow, info.clone());
    };
    let path = render_path(path_stack);
    let mut copy = info.clone();
    let verdict = filter(&path, &mut copy);
    (verdict, copy)
}

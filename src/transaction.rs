//! Transaction lifecycle (C10) and the async entry points (spec.md §5).

use crate::checksum::ObjectChecksum;
use crate::devino::DevinoCache;
use crate::error::{Error, Result};
use crate::repo::Repo;
use crate::utils::ResultExt;
use camino::Utf8PathBuf;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

const LOCK_RELPATH: &str = "transaction";

/// A handle callers can use to request cooperative cancellation of a
/// long-running operation. Checked at entry and at I/O boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// A handle that will never report cancellation.
    pub fn never() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Point-in-time counters accumulated over one transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionStats {
    /// Metadata objects (commit/dirtree/dirmeta) actually installed.
    pub metadata_objects_written: u64,
    /// Metadata object writes attempted, written or not.
    pub metadata_objects_total: u64,
    /// Content (file) objects actually installed.
    pub content_objects_written: u64,
    /// Content object writes attempted, written or not.
    pub content_objects_total: u64,
    /// Sum of declared lengths of content objects actually installed.
    pub content_bytes_written: u64,
}

/// Mutable counters behind their own mutex, per spec.md §3/§5: multiple
/// worker threads may bump these concurrently from `write_*_async`.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters(Mutex<TransactionStats>);

impl StatsCounters {
    pub(crate) fn bump_metadata(&self, written: bool) {
        let mut s = self.0.lock().unwrap();
        s.metadata_objects_total += 1;
        if written {
            s.metadata_objects_written += 1;
        }
    }

    pub(crate) fn bump_content(&self, written: bool, declared_length: u64) {
        let mut s = self.0.lock().unwrap();
        s.content_objects_total += 1;
        if written {
            s.content_objects_written += 1;
            s.content_bytes_written += declared_length;
        }
    }

    fn snapshot(&self) -> TransactionStats {
        *self.0.lock().unwrap()
    }
}

/// Per-transaction state. Exists only while `in_transaction` is true.
#[derive(Debug)]
pub(crate) struct TransactionState {
    pub(crate) stats: Arc<StatsCounters>,
    pub(crate) devino: Arc<RwLock<Option<DevinoCache>>>,
    pending_refs: Mutex<HashMap<String, Option<ObjectChecksum>>>,
}

impl Repo {
    /// Begin a transaction. Returns `true` if a stale lock symlink from a
    /// previous, uncleanly-terminated session was found (a "resume").
    #[tracing::instrument(skip(self))]
    pub fn prepare_transaction(&self) -> Result<bool> {
        let mut txn_slot = self.inner.txn.lock().unwrap();
        if txn_slot.is_some() {
            return Err(Error::io(
                "prepare_transaction",
                std::io::Error::other("already in a transaction"),
            ));
        }
        let resume = match self.root_dir().read_link_contents(LOCK_RELPATH) {
            Ok(_) => {
                self.root_dir()
                    .remove_file(LOCK_RELPATH)
                    .map_err(|e| Error::io("unlink stale lock", e))?;
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(Error::io("readlink lock", e)),
        };
        let target = format!("pid={}", std::process::id());
        self.root_dir()
            .symlink(target, LOCK_RELPATH)
            .map_err(|e| Error::io("symlink lock", e))?;
        *txn_slot = Some(TransactionState {
            stats: Arc::new(StatsCounters::default()),
            devino: Arc::new(RwLock::new(None)),
            pending_refs: Mutex::new(HashMap::new()),
        });
        tracing::debug!(resume, "transaction prepared");
        Ok(resume)
    }

    /// Commit the active transaction: discard `tmp/`, clear the devino
    /// cache, hand off pending ref updates, drop the lock symlink.
    #[tracing::instrument(skip(self, apply_refs))]
    pub fn commit_transaction(
        &self,
        apply_refs: impl FnOnce(&HashMap<String, Option<ObjectChecksum>>) -> Result<()>,
    ) -> Result<TransactionStats> {
        let mut txn_slot = self.inner.txn.lock().unwrap();
        let txn = txn_slot
            .as_ref()
            .ok_or_else(|| Error::io("commit_transaction", std::io::Error::other("not in a transaction")))?;

        self.cleanup_tmpdir()?;
        *txn.devino.write().unwrap() = None;

        let pending = txn.pending_refs.lock().unwrap();
        if !pending.is_empty() {
            apply_refs(&pending)?;
        }
        drop(pending);

        let stats = txn.stats.snapshot();
        self.root_dir()
            .remove_file(LOCK_RELPATH)
            .map_err(|e| Error::io("unlink lock", e))?;
        *txn_slot = None;
        tracing::info!(?stats, "transaction committed");
        Ok(stats)
    }

    /// Abort the active transaction. A no-op if no transaction is open.
    /// Already-installed objects are left in place (spec.md §1 non-goal).
    #[tracing::instrument(skip(self))]
    pub fn abort_transaction(&self) -> Result<()> {
        let mut txn_slot = self.inner.txn.lock().unwrap();
        let Some(txn) = txn_slot.as_ref() else {
            return Ok(());
        };
        self.cleanup_tmpdir()?;
        *txn.devino.write().unwrap() = None;
        txn.pending_refs.lock().unwrap().clear();
        self.root_dir()
            .remove_file(LOCK_RELPATH)
            .map_err(|e| Error::io("unlink lock", e))?;
        *txn_slot = None;
        tracing::debug!("transaction aborted");
        Ok(())
    }

    /// Stage a ref update (or deletion, if `target` is `None`), applied
    /// atomically by the refs store at commit time.
    pub fn transaction_set_ref(&self, refspec: &str, target: Option<ObjectChecksum>) -> Result<()> {
        self.with_active_txn(|txn| {
            txn.pending_refs.lock().unwrap().insert(refspec.to_string(), target);
            Ok(())
        })
    }

    /// Alias kept for parity with the public API surface named in spec.md
    /// §6; refspec parsing (`[remote:]name`) is the caller's responsibility.
    pub fn transaction_set_refspec(&self, refspec: &str, target: Option<ObjectChecksum>) -> Result<()> {
        self.transaction_set_ref(refspec, target)
    }

    pub(crate) fn with_active_txn<R>(&self, f: impl FnOnce(&TransactionState) -> Result<R>) -> Result<R> {
        let guard = self.inner.txn.lock().unwrap();
        let txn = guard
            .as_ref()
            .ok_or_else(|| Error::io("require_transaction", std::io::Error::other("not in a transaction")))?;
        f(txn)
    }

    pub(crate) fn stats_handle(&self) -> Result<Arc<StatsCounters>> {
        self.with_active_txn(|t| Ok(t.stats.clone()))
    }

    pub(crate) fn devino_handle(&self) -> Result<Arc<RwLock<Option<DevinoCache>>>> {
        self.with_active_txn(|t| Ok(t.devino.clone()))
    }

    /// Best-effort: a leftover tmpfile a racing writer already cleaned up, or
    /// one this process can't remove for some other reason, must not block
    /// commit/abort, so each entry's removal failure is logged and swallowed
    /// rather than propagated.
    fn cleanup_tmpdir(&self) -> Result<()> {
        let entries = self.tmp_dir().entries().map_err(|e| Error::io("readdir tmp", e))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io("readdir tmp", e))?;
            let name = entry.file_name();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                self.tmp_dir().remove_dir_all(&name).log_err_default();
            } else {
                self.tmp_dir().remove_file(&name).log_err_default();
            }
        }
        Ok(())
    }
}

/// Resolve the lock path as a repository-relative [`Utf8PathBuf`] for
/// diagnostics (e.g. "this resume left %s behind").
pub(crate) fn lock_relpath() -> Utf8PathBuf {
    Utf8PathBuf::from(LOCK_RELPATH)
}

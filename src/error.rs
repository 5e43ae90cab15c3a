//! Error taxonomy for the repository engine.

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::checksum::ObjectChecksum;

/// Errors produced by any repository operation.
#[derive(Error, Debug)]
pub enum Error {
    /// The calling code requested cancellation via a [`crate::transaction::CancelHandle`].
    #[error("operation cancelled")]
    Cancelled,
    /// A referenced object does not exist in this repository or any parent.
    #[error("object not found: {path}")]
    NotFound {
        /// Relative object path that was probed.
        path: Utf8PathBuf,
    },
    /// A filesystem entry is of a type this store cannot represent (device, fifo, socket).
    #[error("unsupported file type at {path}")]
    UnsupportedFileType {
        /// Logical path of the offending entry.
        path: Utf8PathBuf,
    },
    /// The caller supplied an expected checksum that did not match the computed one.
    #[error("corrupted object: expected {expected} but computed {actual}")]
    CorruptedObject {
        /// Checksum the caller asserted.
        expected: ObjectChecksum,
        /// Checksum actually computed from the input stream.
        actual: ObjectChecksum,
    },
    /// Temp-file name generation failed after repeated collisions.
    #[error("exhausted temp-file name attempts")]
    Exhausted,
    /// An I/O or syscall failure, tagged with the operation and path where known.
    #[error("{op}{}: {source}", path.as_ref().map(|p| format!(" ({p})")).unwrap_or_default())]
    Io {
        /// Short description of the syscall/operation that failed, e.g. `"renameat"`.
        op: &'static str,
        /// Path involved, if known.
        path: Option<Utf8PathBuf>,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Build an [`Error::Io`] with no path context.
    pub(crate) fn io(op: &'static str, source: std::io::Error) -> Self {
        Error::Io {
            op,
            path: None,
            source,
        }
    }

    /// Build an [`Error::Io`] tagged with the path that was being operated on.
    pub(crate) fn io_path(op: &'static str, path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            op,
            path: Some(path.into()),
            source,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Error::io("io", source)
    }
}

impl From<rustix::io::Errno> for Error {
    fn from(e: rustix::io::Errno) -> Self {
        Error::io("syscall", std::io::Error::from(e))
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

//! # A content-addressed filesystem-tree repository engine
//!
//! This crate stores filesystem trees as immutable, content-addressed
//! objects under a `objects/` fanout directory, much like a version control
//! system's object store: every file, directory, and commit is named by the
//! SHA-256 hash of its canonical serialization, so identical content is
//! stored (and hardlinked) exactly once regardless of how many trees
//! reference it.

#![deny(missing_docs)]
#![forbid(unused_must_use)]
#![deny(unsafe_code)]
#![deny(missing_debug_implementations)]

pub mod asyncio;
pub mod checksum;
pub mod commit;
pub mod devino;
pub mod error;
#[cfg(feature = "internal-testing-api")]
pub mod fixture;
pub mod ingest;
pub mod modifier;
pub mod mtree;
mod objgv;
pub mod repo;
mod tempstage;
pub mod transaction;
mod utils;
pub mod variant;
pub mod writer;
mod xattrs;

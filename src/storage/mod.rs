//! # Storage Module
//!
//! This module provides the buffered archive file: a single logical
//! byte-addressable file backed by fixed-size blocks, with a scan-resistant
//! page cache over the committed region and an in-memory write buffer over
//! the uncommitted tail.
//!
//! ## Architecture Overview
//!
//! ```text
//! ArchiveFile
//! ├── IoQueue        positioned read/write over the file handle
//! ├── PageCache      resident pages, access counters, per-session locks
//! ├── WriteBuffer    pool-backed pages for the uncommitted tail
//! └── ArchiveHeader  ten redundant copies, rotating commit slot
//! ```
//!
//! Readers obtain an [`IoSession`] and call [`IoSession::get_block`], which
//! returns a zero-copy [`Block`] pinned against eviction for as long as the
//! session holds it. A logical writer appends through the same call with
//! `for_write = true` and makes the tail durable with
//! [`ArchiveFile::commit`].
//!
//! ## Address Space
//!
//! ```text
//! 0 ──────────── end_of_header ───────── end_of_committed ───────────►
//! │ header copies │ committed data (cache, │ write buffer (in memory, │
//! │ (commit path  │ read-only, durable)    │ writable, volatile until │
//! │  only)        │                        │ the next commit)         │
//! ```
//!
//! Both boundaries are block-size multiples. `get_block` refuses the header
//! region outright and refuses writes below `end_of_committed`; the commit
//! protocol is the only path that mutates bytes below the boundary.
//!
//! ## Module Organization
//!
//! - `header`: archive header codec and redundant-copy recovery
//! - `io_queue`: synchronous positioned file I/O
//! - `page_cache`: frequency-biased page replacement with pinning
//! - `write_buffer`: pool-backed uncommitted tail
//! - `file`: the composed archive file and its I/O sessions
//!
//! ## Thread Safety
//!
//! `ArchiveFile` is `Send + Sync`; sessions are per-thread handles. One
//! mutex serializes cache-map operations, lock bookkeeping, write-buffer
//! access, and the commit boundary repair; a second mutex serializes
//! commits. The miss-path disk read runs outside both.

mod file;
mod header;
mod io_queue;
mod page_cache;
mod write_buffer;

pub use file::{ArchiveFile, Block, IoSession};
pub use header::{ArchiveHeader, ARCHIVE_MAGIC, CURRENT_VERSION};
pub use io_queue::IoQueue;
pub use page_cache::{PageCache, PageLock};
pub use write_buffer::WriteBuffer;

/// Position faults surfaced by [`IoSession::get_block`] and by operations on
/// a closed file. Raised through `eyre` so callers can downcast on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessError {
    /// The request targets the header region, which is mutated only by the
    /// commit path.
    HeaderRegion { position: u64 },
    /// A write targets committed, immutable space.
    CommittedSpace { position: u64 },
    /// The file was closed; the session or handle is no longer usable.
    Closed,
}

impl std::fmt::Display for AccessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessError::HeaderRegion { position } => write!(
                f,
                "position {} is inside the header region and cannot be accessed directly",
                position
            ),
            AccessError::CommittedSpace { position } => write!(
                f,
                "position {} is committed and read-only; writes must target the uncommitted tail",
                position
            ),
            AccessError::Closed => write!(f, "archive file is closed"),
        }
    }
}

impl std::error::Error for AccessError {}

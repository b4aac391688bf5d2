//! # historian - Time-Series Archive Storage Core
//!
//! `historian` is the storage core of a time-series archive engine for
//! high-rate telemetry: point streams (timestamp, point id, entry number,
//! three value slots) written continuously and scanned across wide time
//! ranges. The crate prioritizes:
//!
//! - **Zero-copy reads**: cached pages are handed to readers as direct
//!   slices pinned against eviction, no intermediate buffers
//! - **Scan resistance**: a frequency-biased page cache with half-life decay
//!   keeps hot pages resident through full-archive scans
//! - **Crash safety**: ten redundant header copies with a rotating commit
//!   slot tolerate torn header writes
//!
//! ## Architecture
//!
//! The crate uses a layered architecture:
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  Archive writer / scanner (upper layer)  │
//! ├─────────────────────┬────────────────────┤
//! │ Sorted point buffer │  Delta/XOR codec   │
//! ├─────────────────────┴────────────────────┤
//! │    Buffered archive file (IoSession)     │
//! ├───────────────┬──────────────────────────┤
//! │  Page cache   │      Write buffer        │
//! ├───────────────┴──────────────────────────┤
//! │    Buffer pool │ Positioned file I/O     │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! A single archive file holds ten header copies followed by data pages:
//!
//! ```text
//! archive.tsa
//! ├── block 0          # header copy A
//! ├── block 1          # header copy B
//! ├── blocks 2..9      # header copies C0..C7 (rotating commit slot)
//! └── blocks 10..      # data pages, page-aligned
//! ```
//!
//! Committed data lives in `[end_of_header, end_of_committed)` and is
//! immutable; appends accumulate in an in-memory write buffer logically at
//! `[end_of_committed, ..)` until the next commit makes them durable.
//!
//! ## Module Overview
//!
//! - [`storage`]: buffered archive file, page cache, header codec, file I/O
//! - [`memory`]: shared buffer pool with memory-pressure collection events
//! - [`codec`]: 7-bit varint and delta/XOR point record codec
//! - [`points`]: point key/value types and the sorted point buffer
//! - [`config`]: centralized constants and geometry invariants

#[macro_use]
mod macros;

pub mod codec;
pub mod config;
pub mod memory;
pub mod points;
pub mod storage;

pub use memory::{BufferPool, CollectionTarget, MemoryPressure};
pub use points::{PointKey, PointValue, SortedPointBuffer, TreeStream};
pub use storage::{ArchiveFile, ArchiveHeader, Block, IoSession};

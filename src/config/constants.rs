//! # Configuration Constants
//!
//! This module centralizes all configuration constants, grouping
//! interdependent values together and documenting their relationships.
//!
//! ## Dependency Graph
//!
//! ```text
//! DEFAULT_BLOCK_SIZE (4096 bytes)
//!       │
//!       ├─> HEADER_BLOCK_COUNT (10)
//!       │     end_of_header = HEADER_BLOCK_COUNT * block_size. The first
//!       │     two blocks are header copies A and B; the remaining eight are
//!       │     the rotating commit slots C0..C7.
//!       │
//!       ├─> ROTATING_HEADER_SLOTS (8)
//!       │     The commit slot index is (snapshot_sequence % 8) + 2, so the
//!       │     slot count must equal HEADER_BLOCK_COUNT - 2.
//!       │
//!       └─> DEFAULT_PAGE_SIZE (4096 bytes)
//!             Pool page size must be a multiple of the block size; the
//!             cache addresses pages on a page-size grid anchored at
//!             end_of_header.
//!
//! POOL_NORMAL_WATERMARK_PERCENT (75)
//!       │
//!       └─> POOL_EMERGENCY_WATERMARK_PERCENT (90)
//!             Crossing a watermark raises a collection request at the
//!             matching pressure; exhaustion escalates to Critical. The
//!             Normal watermark must stay below the Emergency watermark.
//! ```
//!
//! ## Critical Invariants
//!
//! These invariants are enforced by compile-time assertions:
//!
//! 1. `DEFAULT_BLOCK_SIZE` is a power of two (header addressing)
//! 2. `DEFAULT_PAGE_SIZE % DEFAULT_BLOCK_SIZE == 0` (grid alignment)
//! 3. `ROTATING_HEADER_SLOTS == HEADER_BLOCK_COUNT - 2` (commit slot math)
//! 4. `POOL_NORMAL_WATERMARK_PERCENT < POOL_EMERGENCY_WATERMARK_PERCENT`
//!
//! ## Modifying Constants
//!
//! Before changing any constant:
//! 1. Check the dependency graph above
//! 2. Run `cargo build` to verify compile-time assertions
//! 3. Run the full test suite

// ============================================================================
// ARCHIVE GEOMETRY
// These define the on-disk layout and are part of the file format
// ============================================================================

/// Default archive block size in bytes. The logical unit of the file format:
/// header copies, the commit boundary, and `last_allocated_block` are all
/// expressed in blocks. Must be a power of two.
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

/// Number of header copies at the start of every archive file.
/// Copy A at block 0, copy B at block 1, rotating copies C0..C7 at
/// blocks 2..10.
pub const HEADER_BLOCK_COUNT: u64 = 10;

/// Number of rotating header slots written round-robin at commit time.
pub const ROTATING_HEADER_SLOTS: u64 = 8;

/// Size of the fixed header struct at the start of each header block.
/// The remainder of the block is zero padding.
pub const HEADER_STRUCT_SIZE: usize = 128;

const _: () = assert!(
    DEFAULT_BLOCK_SIZE.is_power_of_two(),
    "block size must be a power of two"
);

const _: () = assert!(
    ROTATING_HEADER_SLOTS == HEADER_BLOCK_COUNT - 2,
    "rotating slots must fill the header blocks after copies A and B"
);

// ============================================================================
// BUFFER POOL CONFIGURATION
// ============================================================================

/// Default pool page size in bytes. The unit of caching and of pool
/// allocation. Must be a multiple of the block size.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default pool capacity (pages) when no explicit capacity is given and
/// system memory detection is unavailable.
pub const DEFAULT_POOL_PAGES: usize = 256;

/// Minimum pool capacity in pages. A pool smaller than this cannot serve a
/// single session's working set plus the write buffer tail.
pub const MIN_POOL_PAGES: usize = 16;

/// Percentage of total system memory granted to an auto-detected pool.
pub const POOL_BUDGET_PERCENT: usize = 25;

/// Utilization percentage at which the pool raises a Normal collection
/// request after an allocation.
pub const POOL_NORMAL_WATERMARK_PERCENT: usize = 75;

/// Utilization percentage at which the pool raises an Emergency collection
/// request after an allocation.
pub const POOL_EMERGENCY_WATERMARK_PERCENT: usize = 90;

const _: () = assert!(
    DEFAULT_PAGE_SIZE % DEFAULT_BLOCK_SIZE as usize == 0,
    "pool page size must be a multiple of the block size"
);

const _: () = assert!(
    POOL_NORMAL_WATERMARK_PERCENT < POOL_EMERGENCY_WATERMARK_PERCENT,
    "Normal watermark must be below the Emergency watermark"
);

// ============================================================================
// PAGE CACHE CONFIGURATION
// ============================================================================

/// Saturation ceiling for the per-page access counter. Halving decays from
/// the ceiling in at most 32 collection passes, which bounds how long a
/// once-hot page can linger after it goes cold.
pub const MAX_ACCESS_COUNT: u32 = u32::MAX;

/// Collection passes applied for a Critical pressure event. Two passes drop
/// pages with counter <= 1 to zero so they free in a single handler
/// invocation.
pub const CRITICAL_COLLECTION_PASSES: u32 = 2;

// ============================================================================
// CODEC CONFIGURATION
// ============================================================================

/// Worst-case encoded size of one point record: six u64 fields, each at
/// most ten 7-bit groups.
pub const MAX_ENCODED_RECORD_LEN: usize = 60;

//! # Point Types
//!
//! The archive's record schema: a 24-byte key `(timestamp, point_id,
//! entry_number)` and a 24-byte value `(value1, value2, value3)`, all u64.
//! Keys order by timestamp first, then point id, then entry number.
//!
//! ## Fixed Layouts
//!
//! The sorted buffer and the codec are parameterized over fixed-size record
//! types through the [`FixedLayout`] / [`SortableLayout`] capability
//! traits: size, serialization into caller-owned bytes, and a byte-level
//! ordering predicate. The traits are monomorphized, with no per-record dynamic
//! dispatch on the hot path.
//!
//! All multi-byte fields serialize little-endian.

mod sorted_buffer;

pub use sorted_buffer::{ModeError, SortedBufferMode, SortedPointBuffer};

use eyre::Result;

/// Fixed-size serialization capability for buffer entries.
pub trait FixedLayout: Default {
    /// Serialized size in bytes.
    const SIZE: usize;

    /// Writes the record into `buf[..SIZE]`.
    fn write_to(&self, buf: &mut [u8]);

    /// Reads the record from `buf[..SIZE]`.
    fn read_from(&mut self, buf: &[u8]);
}

/// Ordering capability over *serialized* records. The sorted buffer never
/// interprets key bytes itself; it defers every comparison here.
pub trait SortableLayout: FixedLayout {
    /// True iff the record serialized at `left` sorts at or before the one
    /// at `right`.
    fn le_bytes(left: &[u8], right: &[u8]) -> bool;
}

/// Ordered stream of records consumed by the archive writer.
pub trait TreeStream {
    type Key: FixedLayout;
    type Value: FixedLayout;

    /// Fills `key`/`value` with the next record. Returns `Ok(false)` and
    /// raises the end-of-stream flag when exhausted.
    fn read_next(&mut self, key: &mut Self::Key, value: &mut Self::Value) -> Result<bool>;

    fn end_of_stream(&self) -> bool;

    fn set_end_of_stream(&mut self, end_of_stream: bool);
}

/// Identity of one telemetry measurement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PointKey {
    pub timestamp: u64,
    pub point_id: u64,
    pub entry_number: u64,
}

impl PointKey {
    pub fn new(timestamp: u64, point_id: u64, entry_number: u64) -> Self {
        Self {
            timestamp,
            point_id,
            entry_number,
        }
    }
}

impl FixedLayout for PointKey {
    const SIZE: usize = 24;

    fn write_to(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[8..16].copy_from_slice(&self.point_id.to_le_bytes());
        buf[16..24].copy_from_slice(&self.entry_number.to_le_bytes());
    }

    fn read_from(&mut self, buf: &[u8]) {
        self.timestamp = u64::from_le_bytes(buf[0..8].try_into().expect("key slice is 24 bytes"));
        self.point_id = u64::from_le_bytes(buf[8..16].try_into().expect("key slice is 24 bytes"));
        self.entry_number =
            u64::from_le_bytes(buf[16..24].try_into().expect("key slice is 24 bytes"));
    }
}

impl SortableLayout for PointKey {
    fn le_bytes(left: &[u8], right: &[u8]) -> bool {
        let field = |buf: &[u8], at: usize| {
            u64::from_le_bytes(buf[at..at + 8].try_into().expect("key slice is 24 bytes"))
        };
        let lhs = (field(left, 0), field(left, 8), field(left, 16));
        let rhs = (field(right, 0), field(right, 8), field(right, 16));
        lhs <= rhs
    }
}

/// Measurement payload: three opaque value slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PointValue {
    pub value1: u64,
    pub value2: u64,
    pub value3: u64,
}

impl PointValue {
    pub fn new(value1: u64, value2: u64, value3: u64) -> Self {
        Self {
            value1,
            value2,
            value3,
        }
    }
}

impl FixedLayout for PointValue {
    const SIZE: usize = 24;

    fn write_to(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.value1.to_le_bytes());
        buf[8..16].copy_from_slice(&self.value2.to_le_bytes());
        buf[16..24].copy_from_slice(&self.value3.to_le_bytes());
    }

    fn read_from(&mut self, buf: &[u8]) {
        self.value1 = u64::from_le_bytes(buf[0..8].try_into().expect("value slice is 24 bytes"));
        self.value2 = u64::from_le_bytes(buf[8..16].try_into().expect("value slice is 24 bytes"));
        self.value3 = u64::from_le_bytes(buf[16..24].try_into().expect("value slice is 24 bytes"));
    }
}

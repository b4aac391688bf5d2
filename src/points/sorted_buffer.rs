//! # Sorted Point Buffer
//!
//! Bounded staging area between unordered ingest and the archive writer.
//! Up to `capacity` records are enqueued in arrival order; switching the
//! buffer into Reading mode sorts them and streams them out in
//! non-decreasing key order.
//!
//! ## Index-Based Merge Sort
//!
//! Payload bytes are written once and never move. Sorting permutes two
//! parallel `u32` index arrays instead:
//!
//! 1. A pairwise pass seeds sorted runs of length two into array A
//! 2. Bottom-up merges double the run length each pass, alternating
//!    A -> B and B -> A; a `should_swap` flag tracks which array holds the
//!    final permutation
//! 3. Per segment, if the last element of the left run already sorts at or
//!    before the first of the right run, the segment is copied verbatim:
//!    one comparison instead of a full merge
//!
//! The fast path makes near-sorted input (the common replay case) cost
//! O(n) comparisons total. Equal keys keep their arrival order: the merge
//! takes from the left run on ties.
//!
//! ## Mode Machine
//!
//! ```text
//!            try_enqueue            read_next
//!          ┌───────────┐          ┌───────────┐
//!          ▼           │          ▼           │
//!       Writing ──set_mode(Reading)──► Reading
//!          ▲                               │
//!          └───────set_mode(Writing)───────┘
//!                    (clears the buffer)
//! ```
//!
//! Enqueueing while Reading or reading while Writing fails with
//! [`ModeError`]; enqueueing into a full buffer returns `Ok(false)`.

use std::marker::PhantomData;

use eyre::{bail, Result};

use super::{FixedLayout, SortableLayout, TreeStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortedBufferMode {
    Writing,
    Reading,
}

impl SortedBufferMode {
    pub fn name(&self) -> &'static str {
        match self {
            SortedBufferMode::Writing => "writing",
            SortedBufferMode::Reading => "reading",
        }
    }
}

/// Operation issued against the wrong buffer mode.
#[derive(Debug, Clone, Copy)]
pub struct ModeError {
    pub required: SortedBufferMode,
    pub actual: SortedBufferMode,
}

impl std::fmt::Display for ModeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sorted buffer is in {} mode; the operation requires {} mode",
            self.actual.name(),
            self.required.name()
        )
    }
}

impl std::error::Error for ModeError {}

/// Bounded two-phase buffer turning unsorted enqueues into a sorted
/// [`TreeStream`].
pub struct SortedPointBuffer<K: SortableLayout, V: FixedLayout> {
    capacity: usize,
    keys: Vec<u8>,
    values: Vec<u8>,
    index_a: Vec<u32>,
    index_b: Vec<u32>,
    count: usize,
    cursor: usize,
    mode: SortedBufferMode,
    end_of_stream: bool,
    _types: PhantomData<(K, V)>,
}

impl<K: SortableLayout, V: FixedLayout> SortedPointBuffer<K, V> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "sorted buffer capacity must be non-zero");
        assert!(capacity <= u32::MAX as usize, "index arrays address with u32");

        Self {
            capacity,
            keys: vec![0; capacity * K::SIZE],
            values: vec![0; capacity * V::SIZE],
            index_a: vec![0; capacity],
            index_b: vec![0; capacity],
            count: 0,
            cursor: 0,
            mode: SortedBufferMode::Writing,
            end_of_stream: false,
            _types: PhantomData,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.capacity
    }

    pub fn mode(&self) -> SortedBufferMode {
        self.mode
    }

    /// Stores one record. `Ok(false)` when full; [`ModeError`] when the
    /// buffer is draining.
    pub fn try_enqueue(&mut self, key: &K, value: &V) -> Result<bool> {
        if self.mode != SortedBufferMode::Writing {
            bail!(ModeError {
                required: SortedBufferMode::Writing,
                actual: self.mode,
            });
        }
        if self.count == self.capacity {
            return Ok(false);
        }

        let key_at = self.count * K::SIZE;
        let value_at = self.count * V::SIZE;
        key.write_to(&mut self.keys[key_at..key_at + K::SIZE]);
        value.write_to(&mut self.values[value_at..value_at + V::SIZE]);
        self.count += 1;
        Ok(true)
    }

    /// Switches phases. Entering Reading sorts the buffer; entering Writing
    /// clears it. Re-setting the current mode is a no-op.
    pub fn set_mode(&mut self, mode: SortedBufferMode) {
        match (self.mode, mode) {
            (SortedBufferMode::Writing, SortedBufferMode::Reading) => {
                self.sort();
                self.cursor = 0;
                self.end_of_stream = false;
                self.mode = SortedBufferMode::Reading;
            }
            (SortedBufferMode::Reading, SortedBufferMode::Writing) => {
                self.clear();
            }
            _ => {}
        }
    }

    /// Empties the buffer and returns it to Writing mode.
    pub fn clear(&mut self) {
        self.count = 0;
        self.cursor = 0;
        self.end_of_stream = false;
        self.mode = SortedBufferMode::Writing;
    }

    fn key_le(keys: &[u8], left: u32, right: u32) -> bool {
        let left_at = left as usize * K::SIZE;
        let right_at = right as usize * K::SIZE;
        K::le_bytes(
            &keys[left_at..left_at + K::SIZE],
            &keys[right_at..right_at + K::SIZE],
        )
    }

    fn sort(&mut self) {
        let n = self.count;
        let keys = &self.keys;
        let index_a = &mut self.index_a;
        let index_b = &mut self.index_b;

        // Pairwise pass: runs of length two, in order, seeded into A.
        let mut x = 0;
        while x + 1 < n {
            if Self::key_le(keys, x as u32, x as u32 + 1) {
                index_a[x] = x as u32;
                index_a[x + 1] = x as u32 + 1;
            } else {
                index_a[x] = x as u32 + 1;
                index_a[x + 1] = x as u32;
            }
            x += 2;
        }
        if n % 2 == 1 {
            index_a[n - 1] = n as u32 - 1;
        }

        // Bottom-up merges, doubling the run length each pass.
        let mut should_swap = false;
        let mut stride = 2;
        while stride < n {
            should_swap = !should_swap;
            if should_swap {
                Self::merge_pass(keys, &index_a[..n], &mut index_b[..n], stride);
            } else {
                Self::merge_pass(keys, &index_b[..n], &mut index_a[..n], stride);
            }
            stride *= 2;
        }
        if should_swap {
            std::mem::swap(index_a, index_b);
        }
    }

    fn merge_pass(keys: &[u8], src: &[u32], dst: &mut [u32], stride: usize) {
        let n = src.len();
        let mut segment = 0;
        while segment < n {
            let left_end = (segment + stride).min(n);
            let right_end = (segment + 2 * stride).min(n);

            // A lone left run, or two runs already in order, copies
            // verbatim. For near-sorted input this branch dominates and
            // the pass costs one comparison per segment.
            if left_end == right_end
                || Self::key_le(keys, src[left_end - 1], src[left_end])
            {
                dst[segment..right_end].copy_from_slice(&src[segment..right_end]);
                segment = right_end;
                continue;
            }

            let mut left = segment;
            let mut right = left_end;
            let mut out = segment;
            while left < left_end && right < right_end {
                // <= keeps equal keys in arrival order
                if Self::key_le(keys, src[left], src[right]) {
                    dst[out] = src[left];
                    left += 1;
                } else {
                    dst[out] = src[right];
                    right += 1;
                }
                out += 1;
            }
            if left < left_end {
                dst[out..right_end].copy_from_slice(&src[left..left_end]);
            }
            if right < right_end {
                dst[out..right_end].copy_from_slice(&src[right..right_end]);
            }

            segment = right_end;
        }
    }

    /// Emits the next record in key order. `Ok(false)` and the
    /// end-of-stream flag once the cursor reaches the enqueue watermark.
    pub fn read_next(&mut self, key: &mut K, value: &mut V) -> Result<bool> {
        if self.mode != SortedBufferMode::Reading {
            bail!(ModeError {
                required: SortedBufferMode::Reading,
                actual: self.mode,
            });
        }
        if self.cursor >= self.count {
            self.end_of_stream = true;
            return Ok(false);
        }

        let source = self.index_a[self.cursor] as usize;
        let key_at = source * K::SIZE;
        let value_at = source * V::SIZE;
        key.read_from(&self.keys[key_at..key_at + K::SIZE]);
        value.read_from(&self.values[value_at..value_at + V::SIZE]);
        self.cursor += 1;
        Ok(true)
    }
}

impl<K: SortableLayout, V: FixedLayout> TreeStream for SortedPointBuffer<K, V> {
    type Key = K;
    type Value = V;

    fn read_next(&mut self, key: &mut K, value: &mut V) -> Result<bool> {
        SortedPointBuffer::read_next(self, key, value)
    }

    fn end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    fn set_end_of_stream(&mut self, end_of_stream: bool) {
        self.end_of_stream = end_of_stream;
    }
}

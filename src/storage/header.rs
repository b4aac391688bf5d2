//! # Archive Header
//!
//! This module defines the archive file header and its redundant-copy
//! layout. Every archive begins with ten header blocks:
//!
//! ```text
//! Block   Copy   Written
//! -----   ----   ---------------------------------------------
//! 0       A      every commit
//! 1       B      every commit
//! 2..10   C0..C7 one per commit, slot = (snapshot_sequence % 8) + 2
//! ```
//!
//! Copies A and B give immediate redundancy against a torn write; the
//! rotating slot preserves a trail of recent headers so that a commit torn
//! across A *and* B still leaves a recoverable file.
//!
//! ## Header Layout (128 bytes)
//!
//! ```text
//! Offset  Size  Field                 Description
//! ------  ----  --------------------  --------------------------------
//! 0       16    magic                 "historian arch\0\0"
//! 16      4     version               format version (currently 1)
//! 20      4     block_size            power of two, bytes per block
//! 24      8     last_allocated_block  highest committed block index
//! 32      8     snapshot_sequence     monotonic commit counter
//! 40      8     flags                 reserved feature bits
//! 48      72    reserved              opaque metadata region
//! 120     8     checksum              CRC64 over bytes 0..120
//! ```
//!
//! The struct occupies the first 128 bytes of its block; the rest of the
//! block is zero padding so that all ten copies are block-aligned and a
//! freshly created archive has byte-identical copies.
//!
//! ## Recovery
//!
//! At open, copy A is tried first. If it fails validation the block size is
//! probed from copy B at candidate power-of-two offsets, then every slot is
//! scanned and the validating header with the highest snapshot sequence
//! wins. Validation checks magic, version, block-size sanity, and the CRC.

use crc::{Crc, CRC_64_ECMA_182};
use eyre::{bail, ensure, Result};
use log::warn;
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::io_queue::IoQueue;
use crate::config::{HEADER_BLOCK_COUNT, HEADER_STRUCT_SIZE, ROTATING_HEADER_SLOTS};

pub const ARCHIVE_MAGIC: &[u8; 16] = b"historian arch\x00\x00";
pub const CURRENT_VERSION: u32 = 1;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// Candidate block sizes probed when copy A is unreadable.
const PROBE_BLOCK_SIZES: [u32; 8] = [512, 1024, 2048, 4096, 8192, 16384, 32768, 65536];

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct ArchiveHeader {
    magic: [u8; 16],
    version: U32,
    block_size: U32,
    last_allocated_block: U64,
    snapshot_sequence: U64,
    flags: U64,
    reserved: [u8; 72],
    checksum: U64,
}

const _: () = assert!(std::mem::size_of::<ArchiveHeader>() == HEADER_STRUCT_SIZE);

impl ArchiveHeader {
    /// Fresh header for a newly created archive: the ten header blocks are
    /// the only allocated blocks, so `end_of_committed == end_of_header`.
    pub fn new(block_size: u32) -> Self {
        assert!(block_size.is_power_of_two(), "block size must be a power of two");

        let mut header = Self {
            magic: *ARCHIVE_MAGIC,
            version: U32::new(CURRENT_VERSION),
            block_size: U32::new(block_size),
            last_allocated_block: U64::new(HEADER_BLOCK_COUNT - 1),
            snapshot_sequence: U64::new(0),
            flags: U64::new(0),
            reserved: [0u8; 72],
            checksum: U64::new(0),
        };
        header.seal();
        header
    }

    zerocopy_accessors! {
        block_size: u32,
        last_allocated_block: u64,
        snapshot_sequence: u64,
        flags: u64,
    }

    pub fn version(&self) -> u32 {
        self.version.get()
    }

    /// First byte past the header copies.
    pub fn end_of_header(&self) -> u64 {
        HEADER_BLOCK_COUNT * self.block_size.get() as u64
    }

    /// First byte past the committed region.
    pub fn end_of_committed(&self) -> u64 {
        (self.last_allocated_block.get() + 1) * self.block_size.get() as u64
    }

    /// Rotating header slot (block index) written by the commit carrying
    /// this snapshot sequence.
    pub fn rotating_slot(&self) -> u64 {
        (self.snapshot_sequence.get() % ROTATING_HEADER_SLOTS) + 2
    }

    /// Recomputes the checksum after field mutation.
    pub fn seal(&mut self) {
        self.checksum = U64::new(0);
        let crc = CRC64.checksum(&self.as_bytes()[..HEADER_STRUCT_SIZE - 8]);
        self.checksum = U64::new(crc);
    }

    /// Non-erroring validation used by the recovery scan.
    pub fn is_valid(&self) -> bool {
        if &self.magic != ARCHIVE_MAGIC || self.version.get() != CURRENT_VERSION {
            return false;
        }
        let bs = self.block_size.get();
        if bs == 0 || !bs.is_power_of_two() {
            return false;
        }
        let expected = CRC64.checksum(&self.as_bytes()[..HEADER_STRUCT_SIZE - 8]);
        expected == self.checksum.get()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() >= HEADER_STRUCT_SIZE,
            "buffer too small for ArchiveHeader: {} < {}",
            bytes.len(),
            HEADER_STRUCT_SIZE
        );

        let header = Self::read_from_bytes(&bytes[..HEADER_STRUCT_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse ArchiveHeader: {:?}", e))?;

        ensure!(&header.magic == ARCHIVE_MAGIC, "invalid magic bytes in archive header");
        ensure!(
            header.version.get() == CURRENT_VERSION,
            "unsupported archive version: {} (expected {})",
            header.version.get(),
            CURRENT_VERSION
        );
        ensure!(header.is_valid(), "archive header checksum mismatch");

        Ok(header)
    }

    /// Serializes the header into the start of a zeroed block-sized buffer.
    pub fn to_block(&self) -> Vec<u8> {
        let mut block = vec![0u8; self.block_size.get() as usize];
        block[..HEADER_STRUCT_SIZE].copy_from_slice(self.as_bytes());
        block
    }
}

/// Writes the header to all ten slots. Used when creating a fresh archive
/// so every copy starts byte-identical.
pub fn write_all_copies(io: &IoQueue, header: &ArchiveHeader) -> Result<()> {
    let block = header.to_block();
    let block_size = header.block_size() as u64;
    for slot in 0..HEADER_BLOCK_COUNT {
        io.write_at(slot * block_size, &block)?;
    }
    Ok(())
}

/// Writes the three commit copies: A, B, and the rotating slot selected by
/// the header's snapshot sequence.
pub fn write_commit_copies(io: &IoQueue, header: &ArchiveHeader) -> Result<()> {
    let block = header.to_block();
    let block_size = header.block_size() as u64;
    io.write_at(0, &block)?;
    io.write_at(block_size, &block)?;
    io.write_at(header.rotating_slot() * block_size, &block)?;
    Ok(())
}

/// Recovers the newest valid header from an existing archive.
///
/// Copy A is authoritative when it validates and carries the highest
/// snapshot sequence; otherwise every slot competes and the validating
/// header with the highest sequence wins.
pub fn recover(io: &IoQueue) -> Result<ArchiveHeader> {
    let read_candidate = |offset: u64| -> Option<ArchiveHeader> {
        let mut buf = [0u8; HEADER_STRUCT_SIZE];
        let n = io.read_at(offset, &mut buf).ok()?;
        if n < HEADER_STRUCT_SIZE {
            return None;
        }
        let header = ArchiveHeader::read_from_bytes(&buf).ok()?;
        header.is_valid().then_some(header)
    };

    let copy_a = read_candidate(0);

    let block_size = match &copy_a {
        Some(header) => header.block_size(),
        None => {
            // Copy A is torn; the slot offsets depend on the block size, so
            // probe copy B at each candidate geometry.
            let probed = PROBE_BLOCK_SIZES.iter().copied().find(|&bs| {
                read_candidate(bs as u64).is_some_and(|h| h.block_size() == bs)
            });
            match probed {
                Some(bs) => bs,
                None => bail!("no valid archive header found in any slot"),
            }
        }
    };

    let mut best: Option<(u64, ArchiveHeader)> = copy_a.map(|h| (0, h));
    for slot in 1..HEADER_BLOCK_COUNT {
        let offset = slot * block_size as u64;
        if let Some(header) = read_candidate(offset) {
            if header.block_size() != block_size {
                continue;
            }
            let newer = best
                .as_ref()
                .map_or(true, |(_, b)| header.snapshot_sequence() > b.snapshot_sequence());
            if newer {
                best = Some((slot, header));
            }
        }
    }

    match best {
        Some((slot, header)) => {
            if slot != 0 {
                warn!(
                    "archive header copy A stale or corrupt; recovered snapshot {} from slot {}",
                    header.snapshot_sequence(),
                    slot
                );
            }
            Ok(header)
        }
        None => bail!("no valid archive header found in any slot"),
    }
}

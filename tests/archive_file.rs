//! # Archive File Integration Tests
//!
//! End-to-end coverage of the buffered archive file:
//!
//! 1. Create/reopen geometry and the ten redundant header copies
//! 2. Append-and-commit durability, including the rotating header slot
//! 3. Boundary-page repair after a commit that lands mid-page
//! 4. Position faults for the header region and committed space
//! 5. Memory-pressure collection behavior through the shared pool
//! 6. Header recovery with corrupted primary copies
//!
//! ## Background
//!
//! The archive keeps committed data immutable behind a page cache and
//! stages appends in pooled memory. A commit streams the tail to disk,
//! rewrites three header copies, syncs, and repairs the one cached page
//! that straddles the old commit boundary. Crashing between any two steps
//! must leave at least one valid header copy on disk.

use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;

use historian::storage::AccessError;
use historian::{ArchiveFile, ArchiveHeader, BufferPool, MemoryPressure};
use tempfile::tempdir;

const BLOCK: u64 = 4096;
const END_OF_HEADER: u64 = 10 * BLOCK;

fn small_pool() -> Arc<BufferPool> {
    BufferPool::new(4096, 64)
}

mod create_and_reopen {
    use super::*;

    #[test]
    fn fresh_archive_geometry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("archive.tsa");
        let pool = small_pool();

        let file = ArchiveFile::create(&path, &pool, 4096).unwrap();
        assert_eq!(file.end_of_header(), 40960);
        assert_eq!(file.end_of_committed(), 40960);
        assert_eq!(file.len(), 40960);
        assert!(!file.is_read_only());
    }

    #[test]
    fn all_ten_header_copies_are_byte_equal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("archive.tsa");
        let pool = small_pool();

        let file = ArchiveFile::create(&path, &pool, 4096).unwrap();
        drop(file);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len() as u64, END_OF_HEADER);
        let copy_a = &bytes[..BLOCK as usize];
        for slot in 1..10 {
            let at = slot * BLOCK as usize;
            assert_eq!(
                &bytes[at..at + BLOCK as usize],
                copy_a,
                "header copy {} differs",
                slot
            );
        }
    }

    #[test]
    fn reopen_recovers_identical_geometry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("archive.tsa");
        let pool = small_pool();

        drop(ArchiveFile::create(&path, &pool, 4096).unwrap());

        let file = ArchiveFile::open(&path, &pool).unwrap();
        assert_eq!(file.end_of_header(), 40960);
        assert_eq!(file.end_of_committed(), 40960);
        assert_eq!(file.header().snapshot_sequence(), 0);
        assert_eq!(file.block_size(), 4096);
    }
}

mod append_and_commit {
    use super::*;

    fn commit_blocks(file: &ArchiveFile, last_allocated_block: u64) {
        let mut header = file.header();
        header.set_last_allocated_block(last_allocated_block);
        file.commit(header).unwrap();
    }

    #[test]
    fn committed_bytes_reach_disk_and_cache() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("archive.tsa");
        let pool = small_pool();
        let file = ArchiveFile::create(&path, &pool, 4096).unwrap();

        let mut session = file.new_io_session().unwrap();
        session.write(40960, &[0xAB; 8192]).unwrap();
        commit_blocks(&file, 11);

        assert_eq!(file.end_of_committed(), 49152);

        // on-disk bytes carry the pattern verbatim
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes[40960..49152].iter().all(|&b| b == 0xAB));

        // reads now come from the committed path
        let block = session.get_block(40960, false).unwrap();
        assert!(!block.writable());
        assert_eq!(block.first_position(), 40960);
        assert_eq!(block.len(), 4096);
        assert!(block.as_slice().iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn commit_updates_copies_a_b_and_the_rotating_slot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("archive.tsa");
        let pool = small_pool();
        let file = ArchiveFile::create(&path, &pool, 4096).unwrap();

        let mut session = file.new_io_session().unwrap();
        session.write(40960, &[0xAB; 8192]).unwrap();
        commit_blocks(&file, 11);
        drop(session);
        drop(file);

        let bytes = std::fs::read(&path).unwrap();
        let header_at = |slot: u64| {
            ArchiveHeader::from_bytes(&bytes[(slot * BLOCK) as usize..][..128]).unwrap()
        };

        // snapshot 1 selects rotating slot (1 % 8) + 2 = 3
        for slot in [0, 1, 3] {
            let header = header_at(slot);
            assert_eq!(header.snapshot_sequence(), 1, "slot {}", slot);
            assert_eq!(header.last_allocated_block(), 11, "slot {}", slot);
        }
        // untouched slots still hold the creation header
        for slot in [2, 4, 5, 6, 7, 8, 9] {
            let header = header_at(slot);
            assert_eq!(header.snapshot_sequence(), 0, "slot {}", slot);
            assert_eq!(header.last_allocated_block(), 9, "slot {}", slot);
        }
    }

    #[test]
    fn unwritten_gaps_commit_as_zeros() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("archive.tsa");
        let pool = small_pool();
        let file = ArchiveFile::create(&path, &pool, 4096).unwrap();

        let mut session = file.new_io_session().unwrap();
        // skip the first two tail blocks entirely
        session.write(49152, &[0x77; 4096]).unwrap();
        commit_blocks(&file, 12);

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes[40960..49152].iter().all(|&b| b == 0));
        assert!(bytes[49152..53248].iter().all(|&b| b == 0x77));
    }

    #[test]
    fn tail_reads_are_writable_before_commit() {
        let dir = tempdir().unwrap();
        let pool = small_pool();
        let file = ArchiveFile::create(dir.path().join("archive.tsa"), &pool, 4096).unwrap();

        let mut session = file.new_io_session().unwrap();
        let block = session.get_block(40960, false).unwrap();
        assert!(block.writable(), "uncommitted positions are writable");
        assert_eq!(block.first_position(), 40960);

        session.write(40960, &[1; 16]).unwrap();
        let mut header = file.header();
        header.set_last_allocated_block(10);
        file.commit(header).unwrap();

        let block = session.get_block(40960, false).unwrap();
        assert!(!block.writable(), "committed positions are read-only");
        // committed views never cross into uncommitted space
        assert!(block.first_position() + block.len() as u64 <= file.end_of_committed());
    }

    #[test]
    fn commit_cannot_shrink_the_committed_region() {
        let dir = tempdir().unwrap();
        let pool = small_pool();
        let file = ArchiveFile::create(dir.path().join("archive.tsa"), &pool, 4096).unwrap();

        let mut session = file.new_io_session().unwrap();
        session.write(40960, &[9; 4096]).unwrap();
        commit_blocks(&file, 10);

        let mut header = file.header();
        header.set_last_allocated_block(9);
        assert!(file.commit(header).is_err());
    }

    #[test]
    fn read_only_archives_reject_commit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("archive.tsa");
        let pool = small_pool();
        drop(ArchiveFile::create(&path, &pool, 4096).unwrap());

        let file = ArchiveFile::open_read_only(&path, &pool).unwrap();
        assert!(file.is_read_only());

        let header = file.header();
        assert!(file.commit(header).is_err());
    }
}

mod boundary_repair {
    use super::*;

    #[test]
    fn cached_straddling_page_sees_post_commit_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("archive.tsa");
        // 8 KiB pool pages over 4 KiB blocks so a commit can land mid-page
        let pool = BufferPool::new(8192, 64);
        let file = ArchiveFile::create(&path, &pool, 4096).unwrap();

        let mut writer = file.new_io_session().unwrap();
        writer.write(40960, &[0x11; 4096]).unwrap();
        let mut header = file.header();
        header.set_last_allocated_block(10);
        file.commit(header).unwrap();
        assert_eq!(file.end_of_committed(), 45056);

        // cache the straddling page [40960, 49152) with its stale suffix
        let mut reader = file.new_io_session().unwrap();
        {
            let block = reader.get_block(40960, false).unwrap();
            assert_eq!(block.len(), 4096, "clipped at the commit boundary");
            assert!(block.as_slice().iter().all(|&b| b == 0x11));
        }

        writer.write(45056, &[0x22; 4096]).unwrap();
        let mut header = file.header();
        header.set_last_allocated_block(11);
        file.commit(header).unwrap();

        // the same cached page now serves the repaired suffix
        let block = reader.get_block(40960, false).unwrap();
        assert_eq!(block.len(), 8192);
        assert!(block.as_slice()[..4096].iter().all(|&b| b == 0x11));
        assert!(block.as_slice()[4096..].iter().all(|&b| b == 0x22));
    }
}

mod position_faults {
    use super::*;

    #[test]
    fn header_region_is_unreachable() {
        let dir = tempdir().unwrap();
        let pool = small_pool();
        let file = ArchiveFile::create(dir.path().join("archive.tsa"), &pool, 4096).unwrap();
        let mut session = file.new_io_session().unwrap();

        for position in [0, 1024, 40959] {
            for for_write in [false, true] {
                let err = session.get_block(position, for_write).unwrap_err();
                assert_eq!(
                    err.downcast_ref::<AccessError>(),
                    Some(&AccessError::HeaderRegion { position }),
                );
            }
        }
    }

    #[test]
    fn writes_into_committed_space_fail() {
        let dir = tempdir().unwrap();
        let pool = small_pool();
        let file = ArchiveFile::create(dir.path().join("archive.tsa"), &pool, 4096).unwrap();

        let mut session = file.new_io_session().unwrap();
        session.write(40960, &[5; 4096]).unwrap();
        let mut header = file.header();
        header.set_last_allocated_block(10);
        file.commit(header).unwrap();

        let err = session.get_block(41060, true).unwrap_err();
        assert_eq!(
            err.downcast_ref::<AccessError>(),
            Some(&AccessError::CommittedSpace { position: 41060 }),
        );
    }

    #[test]
    fn sessions_observe_close() {
        let dir = tempdir().unwrap();
        let pool = small_pool();
        let file = ArchiveFile::create(dir.path().join("archive.tsa"), &pool, 4096).unwrap();

        let mut session = file.new_io_session().unwrap();
        file.close();
        // double close is a no-op
        file.close();

        let err = session.get_block(40960, false).unwrap_err();
        assert_eq!(err.downcast_ref::<AccessError>(), Some(&AccessError::Closed));
        assert!(file.new_io_session().is_err());
    }
}

mod collection {
    use super::*;

    /// Commits `pages` pages of committed data and reads each one `visits`
    /// times so its access counter is exactly `visits`.
    fn warm_cache(file: &ArchiveFile, pages: u64, visits: u32) {
        let mut session = file.new_io_session().unwrap();
        for page in 0..pages {
            session
                .write(END_OF_HEADER + page * BLOCK, &[page as u8; 4096])
                .unwrap();
        }
        let mut header = file.header();
        header.set_last_allocated_block(9 + pages);
        file.commit(header).unwrap();

        for page in 0..pages {
            for _ in 0..visits {
                session.get_block(END_OF_HEADER + page * BLOCK, false).unwrap();
            }
        }
    }

    #[test]
    fn critical_pressure_frees_lightly_used_pages_in_one_pass() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(4096, 16);
        let file = ArchiveFile::create(dir.path().join("archive.tsa"), &pool, 4096).unwrap();

        warm_cache(&file, 4, 2);

        // counters sit at 2: one halving pass frees nothing
        assert_eq!(pool.raise(MemoryPressure::Normal), 0);
        // Critical halves twice in a single handler invocation
        assert!(pool.raise(MemoryPressure::Critical) >= 1);
    }

    #[test]
    fn exhausted_pool_recovers_by_evicting_cold_pages() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(4096, 16);
        let file = ArchiveFile::create(dir.path().join("archive.tsa"), &pool, 4096).unwrap();

        warm_cache(&file, 8, 1);

        // grab every remaining pool page, forcing escalation into the
        // file's collection handler, which sheds the cold cache pages
        let mut held = Vec::new();
        for _ in 0..12 {
            match pool.allocate_page() {
                Ok((index, _)) => held.push(index),
                Err(err) => panic!("pool failed before evicting cold pages: {err}"),
            }
        }

        for index in held {
            pool.release_page(index);
        }
    }

    #[test]
    fn pool_pages_are_conserved_across_close() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(4096, 32);
        let file = ArchiveFile::create(dir.path().join("archive.tsa"), &pool, 4096).unwrap();

        warm_cache(&file, 4, 1);
        let mut session = file.new_io_session().unwrap();
        session.write(END_OF_HEADER + 4 * BLOCK, &[3; 8192]).unwrap();

        assert!(pool.used_pages() > 0);
        drop(session);
        file.close();
        assert_eq!(pool.used_pages(), 0, "every pool page returned on close");
    }
}

mod rollback {
    use super::*;

    #[test]
    fn rollback_discards_the_tail_only() {
        let dir = tempdir().unwrap();
        let pool = small_pool();
        let file = ArchiveFile::create(dir.path().join("archive.tsa"), &pool, 4096).unwrap();

        let mut session = file.new_io_session().unwrap();
        session.write(40960, &[0xAA; 4096]).unwrap();
        let mut header = file.header();
        header.set_last_allocated_block(10);
        file.commit(header).unwrap();

        session.write(45056, &[0xBB; 4096]).unwrap();
        assert_eq!(file.len(), 49152);

        file.rollback().unwrap();
        assert_eq!(file.len(), 45056, "tail discarded");
        assert_eq!(file.end_of_committed(), 45056, "committed region intact");

        let block = session.get_block(40960, false).unwrap();
        assert!(block.as_slice().iter().all(|&b| b == 0xAA));

        // a discarded tail page rematerializes zeroed
        let block = session.get_block(45056, false).unwrap();
        assert!(block.writable());
        assert!(block.as_slice().iter().all(|&b| b == 0));
    }
}

mod header_recovery {
    use super::*;

    fn corrupt(path: &std::path::Path, offset: u64, len: usize) {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .unwrap();
        file.seek(SeekFrom::Start(offset)).unwrap();
        file.write_all(&vec![0xFF; len]).unwrap();
        file.sync_all().unwrap();
    }

    fn committed_archive(path: &std::path::Path, pool: &Arc<BufferPool>) {
        let file = ArchiveFile::create(path, pool, 4096).unwrap();
        let mut session = file.new_io_session().unwrap();
        session.write(40960, &[0xCD; 4096]).unwrap();
        let mut header = file.header();
        header.set_last_allocated_block(10);
        file.commit(header).unwrap();
    }

    #[test]
    fn corrupt_copy_a_falls_back_to_copy_b() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("archive.tsa");
        let pool = small_pool();
        committed_archive(&path, &pool);

        corrupt(&path, 0, 128);

        let file = ArchiveFile::open(&path, &pool).unwrap();
        assert_eq!(file.header().snapshot_sequence(), 1);
        assert_eq!(file.end_of_committed(), 45056);
    }

    #[test]
    fn corrupt_copies_a_and_b_fall_back_to_the_rotating_slot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("archive.tsa");
        let pool = small_pool();
        committed_archive(&path, &pool);

        corrupt(&path, 0, 128);
        corrupt(&path, BLOCK, 128);

        // snapshot 1 was written to rotating slot 3
        let file = ArchiveFile::open(&path, &pool).unwrap();
        assert_eq!(file.header().snapshot_sequence(), 1);
        assert_eq!(file.header().last_allocated_block(), 10);
    }

    #[test]
    fn stale_copy_a_loses_to_a_newer_rotating_slot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("archive.tsa");
        let pool = small_pool();
        committed_archive(&path, &pool);

        // regress copies A and B to the creation header, simulating a crash
        // after the rotating slot write
        let creation = ArchiveHeader::new(4096);
        let block = creation.to_block();
        let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.write_all(&block).unwrap();
        file.write_all(&block).unwrap();
        file.sync_all().unwrap();
        drop(file);

        let file = ArchiveFile::open(&path, &pool).unwrap();
        assert_eq!(
            file.header().snapshot_sequence(),
            1,
            "highest validating snapshot wins"
        );
    }

    #[test]
    fn all_copies_corrupt_fails_to_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("archive.tsa");
        let pool = small_pool();
        committed_archive(&path, &pool);

        for slot in 0..10 {
            corrupt(&path, slot * BLOCK, 128);
        }
        assert!(ArchiveFile::open(&path, &pool).is_err());
    }
}

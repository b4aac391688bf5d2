//! # Buffered Archive File
//!
//! This module composes the buffer pool, the page cache, the write buffer,
//! and positioned file I/O into a single logical byte-addressable archive.
//!
//! ## Read Path
//!
//! Committed reads are served out of the page cache as zero-copy [`Block`]s
//! pinned against eviction. On a miss, the pool page allocation and the
//! disk read both run *outside* the archive mutex; the insert re-acquires
//! it and resolves races by releasing the loser's page back to the pool.
//!
//! ## Write Path
//!
//! Positions at or above `end_of_committed` live in the write buffer.
//! Blocks served from there are writable and clipped so they never overlap
//! committed space. [`ArchiveFile::commit`] makes the tail durable:
//!
//! 1. Stream `[end_of_committed, new_end)` from the write buffer to disk
//! 2. Write the header to copies A, B, and the rotating slot selected by
//!    the new snapshot sequence
//! 3. Sync OS buffers
//! 4. Under the archive mutex: advance `end_of_committed`, repair the
//!    cached page straddling the old boundary from the write buffer, and
//!    trim fully committed tail pages
//!
//! The boundary repair prevents split reads: a page cached before the
//! commit holds a stale image of the bytes that just became committed, and
//! the repair overwrites that suffix with the authoritative tail bytes.
//!
//! ## Pointer Lifetime
//!
//! A [`Block`] borrows its session mutably, so the borrow checker enforces
//! the "one pinned page per session" rule: the next `get_block` invalidates
//! the previous block at compile time. Blocks served from the write buffer
//! are additionally invalidated by `commit` and `rollback` on the same
//! file; callers must not hold tail blocks across either.

use std::fs::OpenOptions;
use std::marker::PhantomData;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use eyre::{bail, ensure, Result, WrapErr};
use log::debug;
use parking_lot::Mutex;

use super::header::{self, ArchiveHeader};
use super::io_queue::IoQueue;
use super::page_cache::{PageCache, PageLock};
use super::write_buffer::WriteBuffer;
use super::AccessError;
use crate::memory::{BufferPool, CollectionTarget, MemoryPressure};

/// Zero-copy view of a contiguous range of the archive.
///
/// The view borrows its [`IoSession`] mutably; obtaining the next block
/// releases it. For committed blocks the underlying page stays pinned for
/// the lifetime of the borrow.
#[derive(Debug)]
pub struct Block<'a> {
    ptr: NonNull<u8>,
    len: usize,
    first_position: u64,
    writable: bool,
    _session: PhantomData<&'a mut IoSession>,
}

impl Block<'_> {
    /// Logical file position of the first byte of the view.
    pub fn first_position(&self) -> u64 {
        self.first_position
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True iff the view covers uncommitted space.
    pub fn writable(&self) -> bool {
        self.writable
    }

    pub fn contains(&self, position: u64) -> bool {
        position >= self.first_position && position < self.first_position + self.len as u64
    }

    /// Index of `position` within the view.
    pub fn offset_of(&self, position: u64) -> usize {
        debug_assert!(self.contains(position));
        (position - self.first_position) as usize
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr/len describe a range inside a pool page. Committed
        // pages are pinned by the session lock; tail pages live until the
        // next commit/rollback, which the caller must not span. The
        // mutable-borrow link to the session prevents aliasing through a
        // second get_block.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Mutable access to the view; `None` for committed (read-only) blocks.
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        if !self.writable {
            return None;
        }
        // SAFETY: writable views cover uncommitted tail bytes owned by the
        // single logical writer; see as_slice for the lifetime argument.
        Some(unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) })
    }
}

struct Core {
    cache: PageCache,
    tail: WriteBuffer,
    header: ArchiveHeader,
    end_of_committed: u64,
    closed: bool,
}

struct FileShared {
    io: IoQueue,
    pool: Arc<BufferPool>,
    page_size: u64,
    block_size: u32,
    end_of_header: u64,
    read_only: bool,
    /// Pool registration id; 0 until registered.
    target_id: AtomicU64,
    /// The archive mutex: cache map, lock table, write buffer, commit
    /// bookkeeping, boundary repair.
    core: Mutex<Core>,
    /// Serializes commits so at most one flush is in flight.
    flush: Mutex<()>,
}

impl CollectionTarget for FileShared {
    fn run_collection(&self, pressure: MemoryPressure) -> usize {
        let mut core = self.core.lock();
        if core.closed {
            return 0;
        }
        let Core { cache, .. } = &mut *core;
        cache.run_collection(pressure, &self.pool)
    }
}

/// A single-file time-series archive: committed pages behind a
/// scan-resistant cache, an uncommitted tail in pooled memory, and a
/// redundant header committed atomically.
pub struct ArchiveFile {
    shared: Arc<FileShared>,
}

impl ArchiveFile {
    /// Creates a fresh archive at `path` with the given block size, writing
    /// the initial header to all ten slots.
    pub fn create(path: impl AsRef<Path>, pool: &Arc<BufferPool>, block_size: u32) -> Result<Self> {
        ensure!(block_size.is_power_of_two(), "block size must be a power of two");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())
            .wrap_err_with(|| format!("failed to create archive at {:?}", path.as_ref()))?;
        let io = IoQueue::new(file, true);

        let header = ArchiveHeader::new(block_size);
        header::write_all_copies(&io, &header)?;
        io.sync()?;

        Self::from_parts(io, pool, header, false)
    }

    /// Opens an existing archive read-write, recovering the newest valid
    /// header copy.
    pub fn open(path: impl AsRef<Path>, pool: &Arc<BufferPool>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .wrap_err_with(|| format!("failed to open archive at {:?}", path.as_ref()))?;
        let io = IoQueue::new(file, true);
        let header = header::recover(&io)?;
        Self::from_parts(io, pool, header, false)
    }

    /// Opens an existing archive for reading only; `commit` will fail.
    pub fn open_read_only(path: impl AsRef<Path>, pool: &Arc<BufferPool>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .open(path.as_ref())
            .wrap_err_with(|| format!("failed to open archive at {:?}", path.as_ref()))?;
        let io = IoQueue::new(file, false);
        let header = header::recover(&io)?;
        Self::from_parts(io, pool, header, true)
    }

    fn from_parts(
        io: IoQueue,
        pool: &Arc<BufferPool>,
        header: ArchiveHeader,
        read_only: bool,
    ) -> Result<Self> {
        let block_size = header.block_size();
        let page_size = pool.page_size() as u64;
        ensure!(
            page_size >= block_size as u64 && page_size % block_size as u64 == 0,
            "pool page size {} is not a multiple of archive block size {}",
            page_size,
            block_size
        );

        let shared = Arc::new(FileShared {
            io,
            pool: Arc::clone(pool),
            page_size,
            block_size,
            end_of_header: header.end_of_header(),
            read_only,
            target_id: AtomicU64::new(0),
            core: Mutex::new(Core {
                cache: PageCache::new(),
                tail: WriteBuffer::new(page_size as usize),
                end_of_committed: header.end_of_committed(),
                header,
                closed: false,
            }),
            flush: Mutex::new(()),
        });

        let weak = Arc::downgrade(&shared) as std::sync::Weak<dyn CollectionTarget>;
        let id = pool.register(weak);
        shared.target_id.store(id, Ordering::Release);

        Ok(Self { shared })
    }

    pub fn block_size(&self) -> u32 {
        self.shared.block_size
    }

    pub fn is_read_only(&self) -> bool {
        self.shared.read_only
    }

    /// First byte past the header copies.
    pub fn end_of_header(&self) -> u64 {
        self.shared.end_of_header
    }

    /// First byte past the committed region.
    pub fn end_of_committed(&self) -> u64 {
        self.shared.core.lock().end_of_committed
    }

    /// Snapshot of the last committed header.
    pub fn header(&self) -> ArchiveHeader {
        self.shared.core.lock().header
    }

    /// Logical file length: the committed region plus the write-buffer
    /// extent.
    pub fn len(&self) -> u64 {
        let core = self.shared.core.lock();
        core.end_of_committed
            .max(self.shared.end_of_header + core.tail.extent())
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Number of committed pages currently resident in the cache.
    pub fn cached_pages(&self) -> usize {
        self.shared.core.lock().cache.len()
    }

    /// Pages evicted by collection passes over the file's lifetime.
    pub fn cache_evictions(&self) -> u64 {
        self.shared.core.lock().cache.evictions_total()
    }

    /// Opens an I/O session with its own page lock.
    pub fn new_io_session(&self) -> Result<IoSession> {
        let mut core = self.shared.core.lock();
        if core.closed {
            bail!(AccessError::Closed);
        }
        let lock = core.cache.create_lock();
        Ok(IoSession {
            shared: Arc::clone(&self.shared),
            lock: Some(lock),
        })
    }

    /// Commits the write buffer through `new_header`, which carries the new
    /// `last_allocated_block`. The snapshot sequence is advanced and the
    /// header sealed here; the caller supplies geometry and metadata only.
    pub fn commit(&self, mut new_header: ArchiveHeader) -> Result<()> {
        ensure!(!self.shared.read_only, "cannot commit a read-only archive");
        let _flush = self.shared.flush.lock();

        let old_end = {
            let core = self.shared.core.lock();
            if core.closed {
                bail!(AccessError::Closed);
            }
            new_header.set_snapshot_sequence(core.header.snapshot_sequence() + 1);
            core.end_of_committed
        };

        ensure!(
            new_header.block_size() == self.shared.block_size,
            "commit header block size {} does not match archive block size {}",
            new_header.block_size(),
            self.shared.block_size
        );
        new_header.seal();

        let new_end = new_header.end_of_committed();
        ensure!(
            new_end >= old_end,
            "commit cannot shrink the committed region ({} < {})",
            new_end,
            old_end
        );

        // Stream the newly committed range to disk. The write buffer is
        // stable here: the committing thread is the single logical writer
        // and readers never mutate tail pages.
        if new_end > old_end {
            let core = self.shared.core.lock();
            if core.closed {
                bail!(AccessError::Closed);
            }
            let rel_start = old_end - self.shared.end_of_header;
            let rel_end = new_end - self.shared.end_of_header;
            let mut io_result = Ok(());
            let zeros = vec![0u8; self.shared.page_size as usize];
            core.tail.for_each_chunk(rel_start, rel_end, |rel_offset, len, chunk| {
                if io_result.is_err() {
                    return;
                }
                let offset = self.shared.end_of_header + rel_offset;
                io_result = match chunk {
                    Some(bytes) => self.shared.io.write_at(offset, bytes),
                    None => self.shared.io.write_at(offset, &zeros[..len]),
                };
            });
            io_result?;
        }

        header::write_commit_copies(&self.shared.io, &new_header)?;
        self.shared.io.sync()?;

        let mut core = self.shared.core.lock();
        if core.closed {
            bail!(AccessError::Closed);
        }
        core.end_of_committed = new_end;
        core.header = new_header;
        self.repair_boundary_page(&mut core, old_end);
        let first_uncommitted_page = (new_end - self.shared.end_of_header) / self.shared.page_size;
        let Core { tail, .. } = &mut *core;
        tail.trim_below(first_uncommitted_page, &self.shared.pool);
        drop(core);

        debug!(
            "committed archive range [{}, {}) at snapshot {}",
            old_end,
            new_end,
            new_header.snapshot_sequence()
        );
        Ok(())
    }

    /// Overwrites the stale suffix of the cached page straddling the old
    /// commit boundary with the authoritative write-buffer bytes. Runs
    /// under the archive mutex; non-resident pages need no action.
    fn repair_boundary_page(&self, core: &mut Core, old_end: u64) {
        let rel_old = old_end - self.shared.end_of_header;
        let page_offset = (rel_old % self.shared.page_size) as usize;
        if page_offset == 0 {
            // The old boundary was page aligned: no committed page extends
            // past it, so nothing cached can be stale.
            return;
        }
        let straddle_rel = rel_old - page_offset as u64;
        if let Some(ptr) = core.cache.peek(straddle_rel) {
            let len = self.shared.page_size as usize - page_offset;
            // SAFETY: the pointer targets a resident pool page of page_size
            // bytes; we hold the archive mutex, so no reader can race the
            // copy and eviction cannot run.
            let dest = unsafe {
                std::slice::from_raw_parts_mut(ptr.as_ptr().add(page_offset), len)
            };
            core.tail.copy_to(rel_old, dest);
        }
    }

    /// Discards the write buffer back to `end_of_committed`, releasing its
    /// pool pages. Committed state and the on-disk header are untouched.
    pub fn rollback(&self) -> Result<()> {
        let _flush = self.shared.flush.lock();
        let mut core = self.shared.core.lock();
        if core.closed {
            bail!(AccessError::Closed);
        }
        let Core { tail, .. } = &mut *core;
        tail.drain(&self.shared.pool);
        Ok(())
    }

    /// Releases every pooled page, unregisters from the pool, and closes
    /// the handle. Uncommitted tail bytes are lost by design. Idempotent;
    /// outstanding sessions observe [`AccessError::Closed`].
    pub fn close(&self) {
        let id = self.shared.target_id.swap(0, Ordering::AcqRel);
        if id != 0 {
            self.shared.pool.unregister(id);
        }

        let mut core = self.shared.core.lock();
        if core.closed {
            return;
        }
        core.closed = true;
        let Core { cache, tail, .. } = &mut *core;
        cache.drain(&self.shared.pool);
        tail.drain(&self.shared.pool);
    }
}

impl Drop for ArchiveFile {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reader/writer handle over an [`ArchiveFile`], bound to a private page
/// lock. At most one block is pinned per session at any time.
pub struct IoSession {
    shared: Arc<FileShared>,
    lock: Option<PageLock>,
}

impl IoSession {
    /// Returns a contiguous view covering `position`.
    ///
    /// - Positions inside the header region fail with
    ///   [`AccessError::HeaderRegion`]
    /// - `for_write` below `end_of_committed` fails with
    ///   [`AccessError::CommittedSpace`]
    /// - Positions at or above `end_of_committed` are served from the write
    ///   buffer, writable, with `first_position` clipped to the boundary
    /// - Committed positions are served from the cache, read-only, clipped
    ///   so the view never crosses into uncommitted space
    pub fn get_block(&mut self, position: u64, for_write: bool) -> Result<Block<'_>> {
        let shared = Arc::clone(&self.shared);
        let lock = self.lock.as_ref().expect("session lock outlives the session");
        let page_size = shared.page_size;
        let page_mask = page_size - 1;

        loop {
            let mut core = shared.core.lock();
            if core.closed {
                bail!(AccessError::Closed);
            }
            if position < shared.end_of_header {
                bail!(AccessError::HeaderRegion { position });
            }
            if for_write && position < core.end_of_committed {
                bail!(AccessError::CommittedSpace { position });
            }

            core.cache.clear_pin(lock);
            let observed_end = core.end_of_committed;

            if position >= observed_end {
                // Uncommitted tail: serve from the write buffer.
                let rel = position - shared.end_of_header;
                let page_index = rel / page_size;

                if let Some(ptr) = core.tail.page_ptr(page_index) {
                    let page_base = shared.end_of_header + page_index * page_size;
                    let first_position = page_base.max(observed_end);
                    let offset = (first_position - page_base) as usize;
                    let len = page_size as usize - offset;
                    // SAFETY: offset < page_size, so the adjusted pointer
                    // stays inside the tail page.
                    let ptr = unsafe { NonNull::new_unchecked(ptr.as_ptr().add(offset)) };
                    return Ok(Block {
                        ptr,
                        len,
                        first_position,
                        writable: true,
                        _session: PhantomData,
                    });
                }

                // Materialize the tail page. Pool allocation must not run
                // under the archive mutex (collection callbacks take it).
                drop(core);
                let (pool_index, ptr) = shared.pool.allocate_page()?;
                let mut core = shared.core.lock();
                if core.closed {
                    shared.pool.release_page(pool_index);
                    bail!(AccessError::Closed);
                }
                if core.tail.contains(page_index) || core.end_of_committed != observed_end {
                    // Lost a race with another session or with a commit.
                    shared.pool.release_page(pool_index);
                    continue;
                }
                core.tail.insert(page_index, pool_index, ptr);
                continue;
            }

            // Committed space: serve from the cache.
            let rel = (position - shared.end_of_header) & !page_mask;
            if let Some(ptr) = core.cache.try_get(lock, rel) {
                let first_position = shared.end_of_header + rel;
                let len = page_size.min(observed_end - first_position) as usize;
                return Ok(Block {
                    ptr,
                    len,
                    first_position,
                    writable: false,
                    _session: PhantomData,
                });
            }

            // Miss: allocate and read outside the mutex, then insert. A
            // commit interleaving with the read could leave a stale image,
            // so the insert is abandoned if the boundary moved.
            drop(core);
            let (pool_index, ptr) = shared.pool.allocate_page()?;
            // SAFETY: freshly allocated pool page of page_size bytes,
            // exclusively ours until inserted into the cache.
            let buf = unsafe {
                std::slice::from_raw_parts_mut(ptr.as_ptr(), page_size as usize)
            };
            if let Err(err) = shared.io.read_at(shared.end_of_header + rel, buf) {
                shared.pool.release_page(pool_index);
                return Err(err);
            }

            let mut core = shared.core.lock();
            if core.closed {
                shared.pool.release_page(pool_index);
                bail!(AccessError::Closed);
            }
            if core.end_of_committed != observed_end {
                shared.pool.release_page(pool_index);
                continue;
            }
            let (winner, was_added) = core.cache.add_or_get(lock, rel, pool_index, ptr);
            if !was_added {
                shared.pool.release_page(pool_index);
            }
            let first_position = shared.end_of_header + rel;
            let len = page_size.min(observed_end - first_position) as usize;
            return Ok(Block {
                ptr: winner,
                len,
                first_position,
                writable: false,
                _session: PhantomData,
            });
        }
    }

    /// Convenience: copies `buf` into the write buffer at `position`,
    /// spanning pages as needed.
    pub fn write(&mut self, mut position: u64, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let mut block = self.get_block(position, true)?;
            let offset = block.offset_of(position);
            let dest = block.as_mut_slice().expect("tail blocks are writable");
            let n = buf.len().min(dest.len() - offset);
            dest[offset..offset + n].copy_from_slice(&buf[..n]);
            position += n as u64;
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Convenience: copies bytes at `position` into `buf`, spanning blocks
    /// as needed.
    pub fn read(&mut self, position: u64, buf: &mut [u8]) -> Result<()> {
        let mut done = 0;
        while done < buf.len() {
            let at = position + done as u64;
            let block = self.get_block(at, false)?;
            let offset = block.offset_of(at);
            let src = block.as_slice();
            let n = (buf.len() - done).min(src.len() - offset);
            buf[done..done + n].copy_from_slice(&src[offset..offset + n]);
            done += n;
        }
        Ok(())
    }
}

impl Drop for IoSession {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            let mut core = self.shared.core.lock();
            if !core.closed {
                core.cache.release_lock(lock);
            }
        }
    }
}

//! # Frequency-Biased Page Cache
//!
//! This module implements the page replacement algorithm for the archive
//! file: a map from file-relative page position to a resident pool page,
//! aged under memory pressure.
//!
//! ## Why Frequency Bias Instead of LRU?
//!
//! Standard LRU has a critical flaw for archive workloads: a sequential
//! range scan evicts the entire cache. Every scanned page becomes the "most
//! recently used" and pushes out pages that other readers revisit
//! constantly.
//!
//! This cache keeps a per-page access counter instead of recency ordering:
//!
//! - On access: increment the counter (saturating)
//! - On a collection pass: halve every counter (shift right by one)
//! - A page whose counter reaches zero and is not pinned is evicted
//!
//! Hot pages accumulate counter faster than halving erodes it. A one-shot
//! scan leaves each page at counter 1, which drops to zero on the next
//! collection, so scans cannot displace the hot set. Critical pressure runs
//! two halving passes in one invocation so pages with counter <= 1 free
//! immediately.
//!
//! ## Pinning
//!
//! Readers hold a [`PageLock`], one per I/O session, pinning at most one
//! page at a time. A pinned page is never evicted regardless of its
//! counter. Re-mapping the lock to a new page releases the previous pin.
//!
//! ## Locking
//!
//! The cache is a plain structure with no interior locking; the archive
//! file wraps it (together with the write buffer and commit bookkeeping) in
//! the single mutex that the design requires. A future split could shard
//! the map by page-offset hash, provided collection stays globally
//! consistent with the aging policy.

use std::ptr::NonNull;

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::config::{CRITICAL_COLLECTION_PASSES, MAX_ACCESS_COUNT};
use crate::memory::{BufferPool, MemoryPressure};

/// Pin handle owned by one I/O session. While it references a page, that
/// page is exempt from eviction.
#[derive(Debug)]
pub struct PageLock {
    slot: u32,
}

struct CachedPage {
    pool_index: u32,
    ptr: NonNull<u8>,
    access_count: u32,
}

pub struct PageCache {
    pages: HashMap<u64, CachedPage>,
    /// Per-lock pinned position; index is the lock's slot.
    lock_slots: Vec<Option<u64>>,
    free_lock_slots: Vec<u32>,
    evictions_total: u64,
}

impl PageCache {
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            lock_slots: Vec::new(),
            free_lock_slots: Vec::new(),
            evictions_total: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn evictions_total(&self) -> u64 {
        self.evictions_total
    }

    pub fn create_lock(&mut self) -> PageLock {
        let slot = match self.free_lock_slots.pop() {
            Some(slot) => {
                self.lock_slots[slot as usize] = None;
                slot
            }
            None => {
                self.lock_slots.push(None);
                (self.lock_slots.len() - 1) as u32
            }
        };
        PageLock { slot }
    }

    pub fn release_lock(&mut self, lock: PageLock) {
        self.lock_slots[lock.slot as usize] = None;
        self.free_lock_slots.push(lock.slot);
    }

    /// Drops the lock's current pin without mapping a new page.
    pub fn clear_pin(&mut self, lock: &PageLock) {
        self.lock_slots[lock.slot as usize] = None;
    }

    /// Cache lookup. On a hit the page is pinned through `lock` and its
    /// access counter incremented.
    pub fn try_get(&mut self, lock: &PageLock, rel_position: u64) -> Option<NonNull<u8>> {
        let page = self.pages.get_mut(&rel_position)?;
        page.access_count = page.access_count.saturating_add(1).min(MAX_ACCESS_COUNT);
        self.lock_slots[lock.slot as usize] = Some(rel_position);
        Some(page.ptr)
    }

    /// Inserts a freshly read page or returns the incumbent if a concurrent
    /// miss got there first. Returns `(ptr, was_added)`; when `was_added`
    /// is false the caller must release its own page back to the pool.
    pub fn add_or_get(
        &mut self,
        lock: &PageLock,
        rel_position: u64,
        pool_index: u32,
        ptr: NonNull<u8>,
    ) -> (NonNull<u8>, bool) {
        let (ptr, was_added) = match self.pages.entry(rel_position) {
            hashbrown::hash_map::Entry::Occupied(mut entry) => {
                let page = entry.get_mut();
                page.access_count = page.access_count.saturating_add(1).min(MAX_ACCESS_COUNT);
                (page.ptr, false)
            }
            hashbrown::hash_map::Entry::Vacant(entry) => {
                entry.insert(CachedPage {
                    pool_index,
                    ptr,
                    access_count: 1,
                });
                (ptr, true)
            }
        };
        self.lock_slots[lock.slot as usize] = Some(rel_position);
        (ptr, was_added)
    }

    /// Lookup without pinning or counting. Used by the commit boundary
    /// repair, which already runs under the archive mutex.
    pub fn peek(&self, rel_position: u64) -> Option<NonNull<u8>> {
        self.pages.get(&rel_position).map(|page| page.ptr)
    }

    /// Ages every resident page and evicts the ones that decayed to zero,
    /// releasing their memory to `pool`. Critical pressure runs two halving
    /// passes so that pages visited once since the last collection free in
    /// a single invocation. Returns the number of pages evicted.
    pub fn run_collection(&mut self, pressure: MemoryPressure, pool: &BufferPool) -> usize {
        let passes = if pressure == MemoryPressure::Critical {
            CRITICAL_COLLECTION_PASSES
        } else {
            1
        };

        let pinned: SmallVec<[u64; 8]> = self.lock_slots.iter().filter_map(|slot| *slot).collect();

        let mut evicted = 0;
        for _ in 0..passes {
            let mut victims: SmallVec<[u64; 16]> = SmallVec::new();
            for (&rel_position, page) in self.pages.iter_mut() {
                page.access_count >>= 1;
                if page.access_count == 0 && !pinned.contains(&rel_position) {
                    victims.push(rel_position);
                }
            }
            for rel_position in victims {
                let page = self.pages.remove(&rel_position).expect("victim vanished");
                pool.release_page(page.pool_index);
                evicted += 1;
            }
        }

        self.evictions_total += evicted as u64;
        evicted
    }

    /// Releases every resident page to `pool`. Used on close.
    pub fn drain(&mut self, pool: &BufferPool) {
        for (_, page) in self.pages.drain() {
            pool.release_page(page.pool_index);
        }
        self.lock_slots.clear();
        self.free_lock_slots.clear();
    }
}

impl Default for PageCache {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: page pointers target pool memory with stable addresses; the cache
// itself is always accessed under the archive file's mutex.
unsafe impl Send for PageCache {}

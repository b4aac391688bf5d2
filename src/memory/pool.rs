//! # Buffer Pool Implementation
//!
//! Fixed-size page allocator with a free list, escalating collection
//! requests under pressure, and weak-registered collection targets.
//!
//! ## Design Principles
//!
//! 1. **Stable addresses**: pages are individually boxed and never
//!    reallocated, so raw pointers handed to consumers stay valid until the
//!    pool is dropped
//! 2. **Lazy materialization**: capacity is a ceiling, not a pre-allocation;
//!    a page's backing memory is allocated on first use and recycled through
//!    the free list afterwards
//! 3. **Pressure before failure**: allocation only fails after a Critical
//!    collection pass has run and freed nothing
//!
//! ## Locking
//!
//! The slot table and the target registry use separate mutexes. Collection
//! requests are dispatched with neither lock held: targets acquire their own
//! cache locks and release pages back into the pool from inside the
//! callback.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use eyre::{bail, Result};
use log::{debug, warn};
use parking_lot::Mutex;
use sysinfo::System;

use crate::config::{
    DEFAULT_PAGE_SIZE, DEFAULT_POOL_PAGES, MIN_POOL_PAGES, POOL_BUDGET_PERCENT,
    POOL_EMERGENCY_WATERMARK_PERCENT, POOL_NORMAL_WATERMARK_PERCENT,
};

static SYSTEM_TOTAL_MEMORY: OnceLock<usize> = OnceLock::new();
static GLOBAL_POOL: OnceLock<Arc<BufferPool>> = OnceLock::new();

/// Severity of a collection request raised by the pool.
///
/// Normal and Emergency ask targets for one aging pass; Critical asks for an
/// aggressive pass that frees pages visited only once since the last
/// collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryPressure {
    Normal,
    Emergency,
    Critical,
}

impl MemoryPressure {
    pub fn name(&self) -> &'static str {
        match self {
            MemoryPressure::Normal => "normal",
            MemoryPressure::Emergency => "emergency",
            MemoryPressure::Critical => "critical",
        }
    }
}

/// A consumer of pool pages that can shed them under pressure.
///
/// Implementations must never fail and must return immediately when already
/// closed. The return value is the number of pages released back to the
/// pool.
pub trait CollectionTarget: Send + Sync {
    fn run_collection(&self, pressure: MemoryPressure) -> usize;
}

/// Allocation failure after a Critical collection pass freed nothing.
#[derive(Debug, Clone, Copy)]
pub struct PoolExhausted {
    pub capacity: usize,
    pub page_size: usize,
}

impl std::fmt::Display for PoolExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "buffer pool exhausted: all {} pages of {} bytes in use after critical collection",
            self.capacity, self.page_size
        )
    }
}

impl std::error::Error for PoolExhausted {}

struct PoolSlots {
    /// Backing memory per slot; `None` until the slot is first allocated.
    pages: Vec<Option<Box<[u8]>>>,
    /// Indices of materialized pages currently free.
    free: Vec<u32>,
    /// Next never-materialized slot.
    next_fresh: u32,
}

/// Shared fixed-size page allocator with memory-pressure callbacks.
pub struct BufferPool {
    page_size: usize,
    capacity: usize,
    slots: Mutex<PoolSlots>,
    targets: Mutex<Vec<(u64, Weak<dyn CollectionTarget>)>>,
    next_target_id: AtomicU64,
    /// Highest watermark pressure already raised; cleared as utilization
    /// drops. 0 = none, 1 = Normal, 2 = Emergency.
    raised_watermark: AtomicU8,
}

impl BufferPool {
    /// Creates a pool of `capacity_pages` pages of `page_size` bytes each.
    /// The capacity is clamped to [`MIN_POOL_PAGES`].
    pub fn new(page_size: usize, capacity_pages: usize) -> Arc<Self> {
        assert!(page_size.is_power_of_two(), "page size must be a power of two");
        let capacity = capacity_pages.max(MIN_POOL_PAGES);

        Arc::new(Self {
            page_size,
            capacity,
            slots: Mutex::new(PoolSlots {
                pages: Vec::new(),
                free: Vec::new(),
                next_fresh: 0,
            }),
            targets: Mutex::new(Vec::new()),
            next_target_id: AtomicU64::new(1),
            raised_watermark: AtomicU8::new(0),
        })
    }

    /// Creates a pool sized from total system memory
    /// ([`POOL_BUDGET_PERCENT`] of RAM, floored at [`MIN_POOL_PAGES`]).
    pub fn auto_detect(page_size: usize) -> Arc<Self> {
        let total_memory = *SYSTEM_TOTAL_MEMORY.get_or_init(|| {
            let mut sys = System::new();
            sys.refresh_memory();
            sys.total_memory() as usize
        });

        let pages = if total_memory == 0 {
            DEFAULT_POOL_PAGES
        } else {
            (total_memory * POOL_BUDGET_PERCENT) / 100 / page_size
        };

        Self::new(page_size, pages)
    }

    /// Opt-in process-wide default pool ([`DEFAULT_PAGE_SIZE`] pages, sized
    /// from system memory).
    pub fn global() -> &'static Arc<BufferPool> {
        GLOBAL_POOL.get_or_init(|| Self::auto_detect(DEFAULT_PAGE_SIZE))
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of pages currently handed out.
    pub fn used_pages(&self) -> usize {
        let slots = self.slots.lock();
        slots.next_fresh as usize - slots.free.len()
    }

    /// Allocates a zeroed page, raising collection requests at escalating
    /// pressure when no page is free. Fails with [`PoolExhausted`] only
    /// after a Critical pass freed nothing.
    pub fn allocate_page(&self) -> Result<(u32, NonNull<u8>)> {
        const ESCALATION: [Option<MemoryPressure>; 4] = [
            None,
            Some(MemoryPressure::Normal),
            Some(MemoryPressure::Emergency),
            Some(MemoryPressure::Critical),
        ];

        for pressure in ESCALATION {
            if let Some(pressure) = pressure {
                self.raise(pressure);
            }
            if let Some(page) = self.try_allocate() {
                self.check_watermarks();
                return Ok(page);
            }
        }

        bail!(PoolExhausted {
            capacity: self.capacity,
            page_size: self.page_size,
        })
    }

    /// Returns a page to the free list.
    pub fn release_page(&self, index: u32) {
        let mut slots = self.slots.lock();
        debug_assert!(
            (index as usize) < slots.pages.len() && slots.pages[index as usize].is_some(),
            "release of a page that was never allocated"
        );
        debug_assert!(
            !slots.free.contains(&index),
            "double release of pool page {}",
            index
        );
        slots.free.push(index);
        drop(slots);

        self.settle_watermarks();
    }

    /// Registers a collection target; returns the id used to unregister.
    pub fn register(&self, target: Weak<dyn CollectionTarget>) -> u64 {
        let id = self.next_target_id.fetch_add(1, Ordering::Relaxed);
        self.targets.lock().push((id, target));
        id
    }

    /// Removes a registration. Unknown ids are ignored (double unregister
    /// during close is a no-op).
    pub fn unregister(&self, id: u64) {
        self.targets.lock().retain(|(tid, _)| *tid != id);
    }

    /// Dispatches a collection request to every live target and prunes dead
    /// registrations. Returns the total number of pages the targets report
    /// released.
    pub fn raise(&self, pressure: MemoryPressure) -> usize {
        if pressure >= MemoryPressure::Critical {
            warn!("buffer pool raising {} collection", pressure.name());
        } else {
            debug!("buffer pool raising {} collection", pressure.name());
        }

        let live: Vec<Arc<dyn CollectionTarget>> = {
            let mut targets = self.targets.lock();
            targets.retain(|(_, weak)| weak.strong_count() > 0);
            targets.iter().filter_map(|(_, weak)| weak.upgrade()).collect()
        };

        let mut released = 0;
        for target in live {
            released += target.run_collection(pressure);
        }
        released
    }

    fn try_allocate(&self) -> Option<(u32, NonNull<u8>)> {
        let mut slots = self.slots.lock();

        if let Some(index) = slots.free.pop() {
            let page = slots.pages[index as usize]
                .as_mut()
                .expect("free list entry without backing memory");
            page.fill(0);
            let ptr = NonNull::new(page.as_mut_ptr()).expect("boxed page is never null");
            return Some((index, ptr));
        }

        if (slots.next_fresh as usize) < self.capacity {
            let index = slots.next_fresh;
            slots.next_fresh += 1;
            if slots.pages.len() <= index as usize {
                slots.pages.resize_with(index as usize + 1, || None);
            }
            let page = slots.pages[index as usize]
                .insert(vec![0u8; self.page_size].into_boxed_slice());
            let ptr = NonNull::new(page.as_mut_ptr()).expect("boxed page is never null");
            return Some((index, ptr));
        }

        None
    }

    fn utilization_percent(&self) -> usize {
        let used = self.used_pages();
        used * 100 / self.capacity
    }

    /// Raises a watermark pressure once per upward crossing.
    fn check_watermarks(&self) {
        let percent = self.utilization_percent();
        let level = if percent >= POOL_EMERGENCY_WATERMARK_PERCENT {
            2
        } else if percent >= POOL_NORMAL_WATERMARK_PERCENT {
            1
        } else {
            0
        };

        let raised = self.raised_watermark.load(Ordering::Acquire);
        if level > raised
            && self
                .raised_watermark
                .compare_exchange(raised, level, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            let pressure = if level == 2 {
                MemoryPressure::Emergency
            } else {
                MemoryPressure::Normal
            };
            self.raise(pressure);
        }
    }

    /// Lowers the raised watermark as utilization drops so the next upward
    /// crossing fires again.
    fn settle_watermarks(&self) {
        let percent = self.utilization_percent();
        let level = if percent >= POOL_EMERGENCY_WATERMARK_PERCENT {
            2
        } else if percent >= POOL_NORMAL_WATERMARK_PERCENT {
            1
        } else {
            0
        };

        let raised = self.raised_watermark.load(Ordering::Acquire);
        if level < raised {
            let _ = self.raised_watermark.compare_exchange(
                raised,
                level,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }
}

// SAFETY: page pointers are only produced from individually boxed slices
// that are never moved or freed before the pool drops; all slot bookkeeping
// is behind a Mutex.
unsafe impl Send for BufferPool {}
unsafe impl Sync for BufferPool {}

//! # Buffer Pool Management
//!
//! This module provides the shared buffer pool that backs the page cache and
//! the write buffer. The pool hands out fixed-size memory pages and raises
//! *collection requests* when memory pressure builds, letting page consumers
//! shed cold pages instead of growing without bound.
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------+
//! |                      BufferPool                        |
//! |  page_size × capacity_pages, lazily materialized       |
//! +--------------------------------------------------------+
//! |  free list  |  in-use pages (cache / write buffer)     |
//! +--------------------------------------------------------+
//!        │ allocate_page / release_page
//!        │
//!        ▼ collection requests (Normal / Emergency / Critical)
//! +--------------------------------------------------------+
//! |  CollectionTarget registrations (Weak, by id)          |
//! +--------------------------------------------------------+
//! ```
//!
//! ## Pressure Protocol
//!
//! - Crossing the 75% utilization watermark raises a **Normal** request
//! - Crossing 90% raises **Emergency**
//! - An allocation that finds no free page escalates Normal -> Emergency ->
//!   Critical, retrying after each pass, before failing with
//!   [`PoolExhausted`]
//!
//! Targets register with [`BufferPool::register`] as `Weak` references so
//! that the pool never keeps a disposed file alive; a file unregisters
//! explicitly on close.
//!
//! ## Process-Wide Default
//!
//! [`BufferPool::global`] exposes an opt-in, lazily created process-wide
//! pool sized from system memory. Constructors take a pool explicitly; the
//! global is a convenience, never an implicit fallback.

mod pool;

pub use pool::{BufferPool, CollectionTarget, MemoryPressure, PoolExhausted};

//! # Configuration Module
//!
//! This module centralizes all configuration constants for the archive core.
//! Constants are grouped by their functional area and interdependencies are
//! documented and enforced through compile-time assertions.
//!
//! ## Why Centralization?
//!
//! The archive geometry (block size, page size, header slot count) is woven
//! through the file layout, the cache, and the commit protocol. Scattering
//! these values across modules invites mismatch bugs: a page size that does
//! not divide evenly into blocks corrupts the commit boundary repair. By
//! co-locating the constants and adding compile-time checks, such issues are
//! caught at build time.
//!
//! ## Module Organization
//!
//! - [`constants`]: All numeric configuration values with dependency
//!   documentation

pub mod constants;
pub use constants::*;

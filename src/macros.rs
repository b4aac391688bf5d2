//! # Internal Macros
//!
//! This module provides internal macros for reducing boilerplate.
//!
//! ## zerocopy_accessors!
//!
//! Generates getter and setter methods for zerocopy struct fields that use
//! little-endian wrapper types (U32, U64).
//!
//! ### Usage
//!
//! ```ignore
//! use zerocopy::little_endian::{U32, U64};
//!
//! #[repr(C)]
//! struct Header {
//!     block_size: U32,
//!     snapshot_sequence: U64,
//! }
//!
//! impl Header {
//!     zerocopy_accessors! {
//!         block_size: u32,
//!         snapshot_sequence: u64,
//!     }
//! }
//!
//! // Generates:
//! // pub fn block_size(&self) -> u32 { self.block_size.get() }
//! // pub fn set_block_size(&mut self, val: u32) { self.block_size = U32::new(val); }
//! // pub fn snapshot_sequence(&self) -> u64 { self.snapshot_sequence.get() }
//! // pub fn set_snapshot_sequence(&mut self, val: u64) { self.snapshot_sequence = U64::new(val); }
//! ```

/// Generates getter and setter methods for zerocopy little-endian fields.
#[macro_export]
macro_rules! zerocopy_accessors {
    (@impl $field:ident, u32) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u32 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u32) {
                self.$field = ::zerocopy::little_endian::U32::new(val);
            }
        }
    };
    (@impl $field:ident, u64) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u64 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u64) {
                self.$field = ::zerocopy::little_endian::U64::new(val);
            }
        }
    };
    ($($field:ident : $ty:tt),* $(,)?) => {
        $(
            $crate::zerocopy_accessors!(@impl $field, $ty);
        )*
    };
}

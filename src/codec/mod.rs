//! # Point Record Codec
//!
//! Leaf-record compression for the archive: each point record is six u64
//! fields encoded as XOR differences from the previous record, every
//! difference written as a 7-bit variable-length integer. Monotonic or
//! slowly varying fields (timestamps, point ids) collapse to one or two
//! bytes per record.
//!
//! A decoder must start at a leaf-block boundary and walk the stream
//! sequentially: the running registers are the only synchronization state,
//! and they reset at each block.
//!
//! - [`varint`]: the 7-bit continuation varint
//! - [`delta_xor`]: the stateful six-field record codec

pub mod delta_xor;
pub mod varint;

pub use delta_xor::PointCodec;
pub use varint::{decode_uint7, encode_uint7, uint7_len};

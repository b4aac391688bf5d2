//! # Delta/XOR Record Codec
//!
//! Stateful codec for the six-field point record. Each field is XORed with
//! the previous record's field and the difference written as a 7-bit
//! varint. Identical fields cost one byte; timestamps and point ids that
//! step by small increments cost one or two.
//!
//! The codec is self-synchronizing at leaf-block boundaries only: decoding
//! must start where the encoder's registers were reset and walk forward.
//! This is the hot path during range scans: the decode loop is branch
//! light and strictly pointer-linear.

use eyre::Result;

use crate::codec::varint::{decode_uint7, encode_uint7};
use crate::config::MAX_ENCODED_RECORD_LEN;
use crate::points::{PointKey, PointValue};

/// Encoder/decoder state: the six field values of the last record that
/// crossed the codec, all zero at a block boundary.
#[derive(Debug, Default)]
pub struct PointCodec {
    prev: [u64; 6],
}

impl PointCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zeroes the running registers. Call at every leaf-block boundary.
    pub fn reset(&mut self) {
        self.prev = [0; 6];
    }

    /// Worst-case bytes for one record.
    pub const fn max_encoded_len() -> usize {
        MAX_ENCODED_RECORD_LEN
    }

    /// Encodes one record into `buf`, returning the bytes written. `buf`
    /// must hold at least [`Self::max_encoded_len`] bytes.
    pub fn encode(&mut self, key: &PointKey, value: &PointValue, buf: &mut [u8]) -> usize {
        let fields = [
            key.timestamp,
            key.point_id,
            key.entry_number,
            value.value1,
            value.value2,
            value.value3,
        ];

        let mut written = 0;
        for (register, field) in self.prev.iter_mut().zip(fields) {
            let delta = field ^ *register;
            written += encode_uint7(delta, &mut buf[written..]);
            *register = field;
        }
        written
    }

    /// Decodes one record from the front of `buf`, returning the bytes
    /// consumed.
    pub fn decode(&mut self, buf: &[u8], key: &mut PointKey, value: &mut PointValue) -> Result<usize> {
        let mut consumed = 0;
        for register in self.prev.iter_mut() {
            let (delta, read) = decode_uint7(&buf[consumed..])?;
            *register ^= delta;
            consumed += read;
        }

        key.timestamp = self.prev[0];
        key.point_id = self.prev[1];
        key.entry_number = self.prev[2];
        value.value1 = self.prev[3];
        value.value2 = self.prev[4];
        value.value3 = self.prev[5];
        Ok(consumed)
    }
}

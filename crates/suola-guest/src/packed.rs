//! Decoding of the packed 64-bit result returned by the compute export.
//!
//! Layout, most significant bit first:
//!
//! ```text
//! [ offset : 32 ][ error : 1 ][ length : 31 ]
//! ```

use crate::error::{BoundaryError, BoundaryResult};

const ERROR_FLAG: u64 = 0x8000_0000;
const LENGTH_MASK: u64 = 0x7FFF_FFFF;

/// A decoded compute result: where the payload lives and whether it is a
/// signature or the guest's diagnostic text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackedResult {
    /// The payload is the signature.
    Ok {
        /// Offset of the payload in guest memory.
        offset: u32,
        /// Payload length in bytes.
        len: u32,
    },
    /// The payload is an error message from the guest.
    Err {
        /// Offset of the message in guest memory.
        offset: u32,
        /// Message length in bytes.
        len: u32,
    },
}

impl PackedResult {
    /// Decode a raw return value.
    ///
    /// # Errors
    ///
    /// A null offset paired with a nonzero length is rejected before any
    /// memory is touched.
    pub fn decode(raw: u64) -> BoundaryResult<Self> {
        let offset = (raw >> 32) as u32;
        let len = (raw & LENGTH_MASK) as u32;
        let is_error = raw & ERROR_FLAG != 0;

        if offset == 0 && len > 0 {
            return Err(BoundaryError::InvalidPackedResult { raw, len });
        }

        Ok(if is_error {
            Self::Err { offset, len }
        } else {
            Self::Ok { offset, len }
        })
    }

    /// Encode back into the wire layout.
    pub fn encode(self) -> u64 {
        let (offset, len) = self.region();
        let flag = if self.is_error() { ERROR_FLAG } else { 0 };
        (u64::from(offset) << 32) | flag | (u64::from(len) & LENGTH_MASK)
    }

    /// The `(offset, len)` payload region.
    pub fn region(&self) -> (u32, u32) {
        match *self {
            Self::Ok { offset, len } | Self::Err { offset, len } => (offset, len),
        }
    }

    /// Whether the guest flagged the payload as an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Err { .. })
    }
}

//! Four-byte search response header: three magic bytes plus a flag byte.

use bitflags::bitflags;

use crate::error::{SyncError, SyncResult};

/// Identifies a search response payload.
pub const SEARCH_RESPONSE_MAGIC: [u8; 3] = *b"TMS";
pub const HEADER_LEN: usize = 4;

bitflags! {
    /// Which per-image fields the body carries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ResponseFlags: u8 {
        const HAS_IDS        = 0b0000_1000;
        const HAS_HASHES     = 0b0000_0100;
        const HAS_TAGS       = 0b0000_0010;
        const HAS_ATTRIBUTES = 0b0000_0001;
    }
}

impl ResponseFlags {
    pub fn to_header(self) -> [u8; HEADER_LEN] {
        let [a, b, c] = SEARCH_RESPONSE_MAGIC;
        [a, b, c, self.bits()]
    }
}

/// Validates the magic bytes and returns the flags.
pub fn parse_header(buffer: &[u8]) -> SyncResult<ResponseFlags> {
    if buffer.len() < HEADER_LEN {
        return Err(SyncError::Protocol(format!(
            "response too short for header: {} bytes",
            buffer.len()
        )));
    }
    if buffer[..3] != SEARCH_RESPONSE_MAGIC {
        return Err(SyncError::Protocol(format!(
            "bad magic bytes {:02x?}",
            &buffer[..3]
        )));
    }
    ResponseFlags::from_bits(buffer[3]).ok_or_else(|| {
        SyncError::Protocol(format!("reserved flag bits set: {:#010b}", buffer[3]))
    })
}

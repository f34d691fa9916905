//! Fixed 12-byte frame header.
//!
//! ```text
//! 0      4          8        12
//! ┌──────┬──────────┬────────┐
//! │ RSU0 │ checksum │ length │   all little-endian u32
//! └──────┴──────────┴────────┘
//! ```

use crate::error::CaptureError;

pub const MAGIC: [u8; 4] = *b"RSU0";
pub const HEADER_SIZE: usize = 12;
/// Largest body the codec will accept or produce (16 MiB).
pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub checksum: u32,
    pub body_length: u32,
}

impl FrameHeader {
    /// Header for `body`, checksum included.
    pub fn for_body(body: &[u8]) -> Result<Self, CaptureError> {
        if body.len() > MAX_BODY_SIZE {
            return Err(CaptureError::FrameTooLarge {
                size: body.len(),
                max: MAX_BODY_SIZE,
            });
        }
        Ok(Self {
            checksum: checksum(body),
            body_length: body.len() as u32,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&MAGIC);
        out[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        out[8..12].copy_from_slice(&self.body_length.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Result<Self, CaptureError> {
        if bytes[0..4] != MAGIC {
            return Err(CaptureError::InvalidMagic);
        }
        let checksum = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let body_length = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        if body_length as usize > MAX_BODY_SIZE {
            return Err(CaptureError::FrameTooLarge {
                size: body_length as usize,
                max: MAX_BODY_SIZE,
            });
        }
        Ok(Self {
            checksum,
            body_length,
        })
    }

    pub fn verify(&self, body: &[u8]) -> Result<(), CaptureError> {
        if checksum(body) != self.checksum {
            return Err(CaptureError::ChecksumMismatch);
        }
        Ok(())
    }
}

/// First four bytes of the blake3 hash, little-endian.
fn checksum(body: &[u8]) -> u32 {
    let hash = blake3::hash(body);
    let b = hash.as_bytes();
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

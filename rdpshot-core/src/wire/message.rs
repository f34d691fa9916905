use serde::{Deserialize, Serialize};

use crate::bitmap::BitmapUpdate;
use crate::error::CaptureError;

/// Messages exchanged on the update stream, in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireMessage {
    /// Client → server: requested desktop size.
    Hello { width: u32, height: u32 },
    /// Server → client: handshake done, updates follow.
    Ready,
    /// Server → client: one changed rectangle.
    Update(BitmapUpdate),
    /// Either direction: orderly shutdown.
    Close,
}

impl WireMessage {
    pub fn to_body(&self) -> Result<Vec<u8>, CaptureError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_body(body: &[u8]) -> Result<Self, CaptureError> {
        Ok(bincode::deserialize(body)?)
    }
}

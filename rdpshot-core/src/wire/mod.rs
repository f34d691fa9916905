//! Framing for the TCP update stream.
//!
//! # Wire Protocol
//!
//! ```text
//! Client ──[Hello {width, height}]──► Server
//! Server ──[Ready]──────────────────► Client
//! Server ──[Update]─────────────────► Client   (repeated)
//! Client ──[Close]──────────────────► Server   (on idle timeout)
//! Server ──[Close]──────────────────► Client   (either side may start)
//! ```
//!
//! Every frame is a [`FrameHeader`] followed by a bincode-encoded
//! [`WireMessage`].

pub mod codec;
pub mod header;
pub mod message;

pub use codec::UpdateCodec;
pub use header::{FrameHeader, HEADER_SIZE, MAGIC, MAX_BODY_SIZE};
pub use message::WireMessage;

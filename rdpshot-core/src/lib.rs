//! # rdpshot-core
//!
//! Screenshot capture for remote desktops: connect, composite the
//! bitmap updates the server pushes, and save the picture once the screen
//! has stopped changing.
//!
//! This crate contains:
//! - **Bitmap**: `BitmapUpdate` and conversion of remote pixel formats to RGB
//! - **Snapshot**: `OutputImage`, the clipped fixed-size canvas, and saving it
//! - **Compositor**: `FrameCompositor`, the per-session update state machine
//! - **Session**: the async driver with the idle-timeout debounce
//! - **Registry**: `SessionRegistry`, live-session counting and shutdown
//! - **Protocol**: the `ProtocolClient` seam the driver consumes
//! - **Wire / Transport**: `UpdateCodec` framing and `TcpProtocolClient`
//! - **Error**: `CaptureError`, a `thiserror`-based error hierarchy

pub mod bitmap;
pub mod compositor;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod snapshot;
pub mod target;
pub mod transport;
pub mod wire;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use bitmap::{BitmapUpdate, RemotePixelFormat};
pub use compositor::{CompositorPhase, FrameCompositor, UpdateOutcome};
pub use error::CaptureError;
pub use protocol::{ConnectRequest, ProtocolClient, SessionControl, SessionEvent, SessionLink};
pub use registry::{
    CaptureSummary, EndDisposition, SessionHandle, SessionId, SessionRegistry, capture_all,
};
pub use session::{EndReason, Saved, SessionOutcome, SessionPhase, SessionSettings};
pub use snapshot::{OutputImage, Rect};
pub use target::{DEFAULT_PORT, Target};
pub use transport::TcpProtocolClient;
pub use wire::{UpdateCodec, WireMessage};

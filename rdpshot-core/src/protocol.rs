//! The seam between the capture core and a remote-display protocol stack.
//!
//! A [`ProtocolClient`] opens one session per target and hands back a
//! [`SessionLink`]: an ordered event stream plus a control handle. Events
//! for one session are delivered FIFO; nothing is promised across
//! sessions.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bitmap::BitmapUpdate;
use crate::error::CaptureError;
use crate::target::Target;

/// Capacity of a session's event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// ── ConnectRequest ───────────────────────────────────────────────

/// Everything a protocol client needs to open one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub target: Target,
    /// Desktop width to ask the server for.
    pub width: u32,
    /// Desktop height to ask the server for.
    pub height: u32,
}

// ── SessionEvent ─────────────────────────────────────────────────

/// Events a protocol client delivers for an established session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Handshake finished; updates follow.
    Ready,
    /// A region of the remote screen changed.
    Update(BitmapUpdate),
    /// The session closed cleanly (either side initiated).
    Closed,
    /// The connection dropped.
    Lost(String),
}

// ── SessionControl ───────────────────────────────────────────────

/// Handle the core uses to ask the protocol side to close a session.
#[derive(Debug, Clone, Default)]
pub struct SessionControl {
    close: CancellationToken,
}

impl SessionControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the session to close. The protocol client answers with
    /// [`SessionEvent::Closed`] once it has done so. Repeated calls are
    /// harmless.
    pub fn request_close(&self) {
        self.close.cancel();
    }

    pub fn close_requested(&self) -> bool {
        self.close.is_cancelled()
    }

    /// Resolves once [`request_close`](Self::request_close) has been
    /// called.
    pub async fn closed(&self) {
        self.close.cancelled().await
    }
}

// ── SessionLink ──────────────────────────────────────────────────

/// An established session as seen by the core.
#[derive(Debug)]
pub struct SessionLink {
    pub events: mpsc::Receiver<SessionEvent>,
    pub control: SessionControl,
}

impl SessionLink {
    /// Create a link together with the sender half the protocol side
    /// pushes events into.
    pub fn channel() -> (mpsc::Sender<SessionEvent>, Self) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        (
            tx,
            Self {
                events: rx,
                control: SessionControl::new(),
            },
        )
    }
}

// ── ProtocolClient ───────────────────────────────────────────────

/// A remote-display protocol implementation.
///
/// `connect` failing means the connection attempt failed; the session is
/// never considered established. Once it returns a link, every session
/// ends with exactly one terminal event, or with the event channel
/// closing.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    async fn connect(&self, request: ConnectRequest) -> Result<SessionLink, CaptureError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn close_request_is_observed_by_clones() {
        let (_tx, link) = SessionLink::channel();
        let protocol_side = link.control.clone();
        assert!(!protocol_side.close_requested());

        link.control.request_close();
        link.control.request_close();
        protocol_side.closed().await;
        assert!(protocol_side.close_requested());
    }
}

//! Per-session frame compositor.
//!
//! Applies bitmap updates to an [`OutputImage`] and tracks when the
//! session has gone quiet. The compositor is a plain state machine: it
//! never touches timers or sockets itself, it tells the session driver
//! what to do through its return values.
//!
//! ```text
//!  Ready ──update──► Receiving ──idle timeout──► Closing
//!    │                   │                          │
//!    └───────────────────┴────────close─────────────┴──► Terminated
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::bitmap::{self, BitmapUpdate};
use crate::error::CaptureError;
use crate::snapshot::{OutputImage, Rect};

// ── CompositorPhase ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompositorPhase {
    /// Buffer allocated, nothing received yet.
    #[default]
    Ready,
    /// At least one update applied; idle timer armed.
    Receiving,
    /// Close requested, waiting for the session to confirm.
    Closing,
    /// Image persisted (or persistence attempted).
    Terminated,
}

impl fmt::Display for CompositorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "Ready"),
            Self::Receiving => write!(f, "Receiving"),
            Self::Closing => write!(f, "Closing"),
            Self::Terminated => write!(f, "Terminated"),
        }
    }
}

// ── UpdateOutcome ────────────────────────────────────────────────

/// What happened to a single update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Pixels were written; `Rect` is the clipped area actually touched.
    Applied(Rect),
    /// The destination lies entirely outside the image.
    Dropped,
    /// The bitmap could not be decoded; nothing was written.
    Rejected,
    /// The compositor has already terminated.
    Ignored,
}

// ── FrameCompositor ──────────────────────────────────────────────

pub struct FrameCompositor {
    image: OutputImage,
    path: PathBuf,
    jpeg_quality: u8,
    phase: CompositorPhase,
    updates_applied: u64,
}

impl FrameCompositor {
    /// Allocate a black `width × height` canvas that will be saved to
    /// `path` on close.
    pub fn new(width: u32, height: u32, path: impl Into<PathBuf>, jpeg_quality: u8) -> Self {
        Self {
            image: OutputImage::new(width, height),
            path: path.into(),
            jpeg_quality,
            phase: CompositorPhase::Ready,
            updates_applied: 0,
        }
    }

    pub fn phase(&self) -> CompositorPhase {
        self.phase
    }

    pub fn image(&self) -> &OutputImage {
        &self.image
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn updates_applied(&self) -> u64 {
        self.updates_applied
    }

    /// The remote session finished its handshake.
    pub fn on_ready(&self) {
        info!(
            "connected, capturing {}x{}",
            self.image.width(),
            self.image.height()
        );
    }

    /// Composite one update.
    ///
    /// Any outcome other than `Ignored` counts as activity from the
    /// server; the caller should re-arm the idle timer when
    /// [`should_rearm_idle`](Self::should_rearm_idle) says so.
    pub fn on_update(&mut self, update: &BitmapUpdate) -> UpdateOutcome {
        match self.phase {
            CompositorPhase::Terminated => return UpdateOutcome::Ignored,
            CompositorPhase::Ready => self.phase = CompositorPhase::Receiving,
            CompositorPhase::Receiving | CompositorPhase::Closing => {}
        }

        let dest = match update.dest_rect() {
            Ok(r) => r,
            Err(e) => {
                warn!("rejecting update: {e}");
                return UpdateOutcome::Rejected;
            }
        };

        if dest.intersect(&self.image.bounds()).is_none() {
            debug!(?dest, "update entirely outside the image, dropped");
            return UpdateOutcome::Dropped;
        }

        let decoded = match bitmap::decode(update) {
            Ok(img) => img,
            Err(e) => {
                warn!(?dest, "rejecting update: {e}");
                return UpdateOutcome::Rejected;
            }
        };

        match self.image.blit(dest, &decoded) {
            Some(written) => {
                self.updates_applied += 1;
                if written != dest {
                    debug!(?dest, ?written, "update clipped");
                }
                UpdateOutcome::Applied(written)
            }
            None => UpdateOutcome::Dropped,
        }
    }

    /// Whether activity in the current phase should push the idle
    /// deadline back. Once closing has started the deadline is gone for
    /// good.
    pub fn should_rearm_idle(&self) -> bool {
        matches!(self.phase, CompositorPhase::Receiving)
    }

    /// The idle timer fired with no update since it was armed.
    ///
    /// Returns `true` when the caller should ask the session to close.
    pub fn on_idle_timeout(&mut self) -> bool {
        match self.phase {
            CompositorPhase::Ready | CompositorPhase::Receiving => {
                info!(
                    updates = self.updates_applied,
                    "no screen updates within idle window, closing"
                );
                self.phase = CompositorPhase::Closing;
                true
            }
            CompositorPhase::Closing | CompositorPhase::Terminated => false,
        }
    }

    /// The session is closed: save the image.
    ///
    /// Returns the written path, or `Ok(None)` if the compositor had
    /// already terminated. Terminates even when saving fails, so a
    /// failing path is only ever tried once.
    pub fn on_close(&mut self) -> Result<Option<PathBuf>, CaptureError> {
        if self.phase == CompositorPhase::Terminated {
            return Ok(None);
        }
        self.phase = CompositorPhase::Terminated;

        info!("save screenshot into {}", self.path.display());
        self.image.save(&self.path, self.jpeg_quality)?;
        Ok(Some(self.path.clone()))
    }
}

impl fmt::Debug for FrameCompositor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameCompositor")
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .field("path", &self.path)
            .field("phase", &self.phase)
            .field("updates_applied", &self.updates_applied)
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────

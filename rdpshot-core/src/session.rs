//! One capture session: connect, composite, detect quiescence, save.
//!
//! The driver owns the only idle deadline for its session. Each update
//! replaces that deadline, so the timer always measures from the most
//! recent update, never from the first one, and there is never more than
//! one pending.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::{Instant as TokioInstant, sleep_until};
use tracing::{debug, error, info, warn};

use crate::compositor::{FrameCompositor, UpdateOutcome};
use crate::error::CaptureError;
use crate::protocol::{ConnectRequest, ProtocolClient, SessionEvent, SessionLink};
use crate::snapshot::DEFAULT_JPEG_QUALITY;
use crate::target::Target;

// ── SessionPhase ─────────────────────────────────────────────────

/// Lifecycle of a session.
///
/// ```text
///  Connecting ──► Active ──► Closing ──► Terminated
///       │            │                       ▲
///       └────────────┴───────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Connecting,
    Active {
        since: Instant,
    },
    Closing,
    Terminated,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Active { .. } => write!(f, "Active"),
            Self::Closing => write!(f, "Closing"),
            Self::Terminated => write!(f, "Terminated"),
        }
    }
}

impl SessionPhase {
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// How long the session has been active, if it is.
    pub fn active_for(&self) -> Option<Duration> {
        match self {
            Self::Active { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    /// Transition to `Active`.
    ///
    /// Valid from: `Connecting`.
    pub fn activate(&mut self) -> Result<(), CaptureError> {
        match self {
            Self::Connecting => {
                *self = Self::Active {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(CaptureError::ProtocolViolation(
                "cannot activate: not in Connecting state",
            )),
        }
    }

    /// Transition to `Closing`.
    ///
    /// Valid from: `Active`.
    pub fn begin_close(&mut self) -> Result<(), CaptureError> {
        match self {
            Self::Active { .. } => {
                *self = Self::Closing;
                Ok(())
            }
            _ => Err(CaptureError::ProtocolViolation(
                "cannot close: not in Active state",
            )),
        }
    }

    /// Transition to `Terminated`.
    ///
    /// Valid from any non-terminal phase; a second call is an error.
    pub fn terminate(&mut self) -> Result<(), CaptureError> {
        match self {
            Self::Terminated => Err(CaptureError::ProtocolViolation(
                "session already terminated",
            )),
            _ => {
                *self = Self::Terminated;
                Ok(())
            }
        }
    }
}

// ── SessionSettings ──────────────────────────────────────────────

/// Per-session capture parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub width: u32,
    pub height: u32,
    /// Path prefix; the host name and extension are appended.
    pub output_prefix: PathBuf,
    /// Output file extension, which also picks the image format.
    pub extension: String,
    pub jpeg_quality: u8,
    /// How long the server must stay silent before we close.
    pub idle_timeout: Duration,
    /// How long to wait for the server to confirm a close we asked for.
    pub close_grace: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 800,
            output_prefix: PathBuf::from("/tmp/"),
            extension: "jpg".into(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            idle_timeout: Duration::from_secs(5),
            close_grace: Duration::from_secs(2),
        }
    }
}

impl SessionSettings {
    pub fn output_path(&self, target: &Target) -> PathBuf {
        target.output_path(&self.output_prefix, &self.extension)
    }
}

// ── EndReason / SessionOutcome ───────────────────────────────────

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// Closed normally, by us or by the server.
    Closed,
    /// The connection was never established.
    Failed(String),
    /// The connection dropped after it was established.
    Lost(String),
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Failed(r) => write!(f, "connection failed : {r}"),
            Self::Lost(r) => write!(f, "connection lost : {r}"),
        }
    }
}

/// Result of persisting a session's image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Saved {
    /// Nothing was saved: the session never connected, or its task died.
    NotAttempted,
    Written(PathBuf),
    /// Saving failed; the message names the path and the cause.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub reason: EndReason,
    pub saved: Saved,
    pub updates_applied: u64,
}

// ── Driver ───────────────────────────────────────────────────────

/// Connect to `target` and run the session to completion.
pub async fn run_session(
    client: Arc<dyn ProtocolClient>,
    target: Target,
    settings: SessionSettings,
) -> SessionOutcome {
    let request = ConnectRequest {
        target: target.clone(),
        width: settings.width,
        height: settings.height,
    };

    let link = match client.connect(request).await {
        Ok(link) => link,
        Err(e) => {
            return SessionOutcome {
                reason: EndReason::Failed(e.to_string()),
                saved: Saved::NotAttempted,
                updates_applied: 0,
            };
        }
    };

    let compositor = FrameCompositor::new(
        settings.width,
        settings.height,
        settings.output_path(&target),
        settings.jpeg_quality,
    );
    drive_session(link, compositor, &settings).await
}

/// Feed a connected session's events to its compositor until the
/// session ends, then save the image.
pub async fn drive_session(
    mut link: SessionLink,
    mut compositor: FrameCompositor,
    settings: &SessionSettings,
) -> SessionOutcome {
    let mut phase = SessionPhase::Connecting;
    advance(&mut phase, SessionPhase::activate);

    // At most one of each is pending; assigning replaces the old one.
    let mut idle_deadline: Option<TokioInstant> = None;
    let mut close_deadline: Option<TokioInstant> = None;

    let reason = loop {
        tokio::select! {
            biased;

            event = link.events.recv() => match event {
                Some(SessionEvent::Ready) => compositor.on_ready(),
                Some(SessionEvent::Update(update)) => {
                    let outcome = compositor.on_update(&update);
                    if outcome != UpdateOutcome::Ignored && compositor.should_rearm_idle() {
                        idle_deadline = Some(TokioInstant::now() + settings.idle_timeout);
                    }
                }
                Some(SessionEvent::Closed) => break EndReason::Closed,
                Some(SessionEvent::Lost(reason)) => break EndReason::Lost(reason),
                None => break EndReason::Lost("event stream ended".into()),
            },

            _ = wait_until(idle_deadline) => {
                idle_deadline = None;
                let active_for = phase.active_for();
                if compositor.on_idle_timeout() && advance(&mut phase, SessionPhase::begin_close) {
                    debug!(?active_for, "screen settled");
                    link.control.request_close();
                    close_deadline = Some(TokioInstant::now() + settings.close_grace);
                }
            }

            _ = wait_until(close_deadline) => {
                debug!("peer did not confirm close within {:?}", settings.close_grace);
                break EndReason::Closed;
            }
        }
    };

    // Stop listening before the potentially slow encode.
    drop(link);
    advance(&mut phase, SessionPhase::terminate);

    let updates_applied = compositor.updates_applied();
    let saved = match tokio::task::spawn_blocking(move || compositor.on_close()).await {
        Ok(Ok(Some(path))) => Saved::Written(path),
        Ok(Ok(None)) => Saved::NotAttempted,
        Ok(Err(e)) => {
            error!("{e}");
            Saved::Failed(e.to_string())
        }
        Err(join) => {
            error!("screenshot writer panicked: {join}");
            Saved::Failed(join.to_string())
        }
    };

    if let Saved::Written(path) = &saved {
        info!(updates = updates_applied, "saved {}", path.display());
    }

    SessionOutcome {
        reason,
        saved,
        updates_applied,
    }
}

/// Apply a phase transition, logging it or the reason it was refused.
fn advance(
    phase: &mut SessionPhase,
    transition: fn(&mut SessionPhase) -> Result<(), CaptureError>,
) -> bool {
    match transition(phase) {
        Ok(()) => {
            debug!("session {phase}");
            true
        }
        Err(e) => {
            warn!(%phase, "{e}");
            false
        }
    }
}

async fn wait_until(deadline: Option<TokioInstant>) {
    match deadline {
        Some(d) => sleep_until(d).await,
        None => std::future::pending().await,
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::BitmapUpdate;
    use image::{Rgb, RgbImage};
    use tokio::sync::mpsc;

    fn update(x: u32, y: u32, w: u32, h: u32, c: [u8; 3]) -> SessionEvent {
        SessionEvent::Update(
            BitmapUpdate::from_rgb(x, y, &RgbImage::from_pixel(w, h, Rgb(c)), false).unwrap(),
        )
    }

    fn settings(dir: &std::path::Path, idle_ms: u64) -> SessionSettings {
        SessionSettings {
            width: 100,
            height: 100,
            output_prefix: dir.join(""),
            extension: "png".into(),
            idle_timeout: Duration::from_millis(idle_ms),
            close_grace: Duration::from_millis(500),
            ..SessionSettings::default()
        }
    }

    /// Plays the protocol side: acknowledges a close request with Closed
    /// and reports when it saw the request.
    fn spawn_acking_peer(
        tx: mpsc::Sender<SessionEvent>,
        link: &SessionLink,
    ) -> tokio::task::JoinHandle<TokioInstant> {
        let control = link.control.clone();
        tokio::spawn(async move {
            control.closed().await;
            let at = TokioInstant::now();
            let _ = tx.send(SessionEvent::Closed).await;
            at
        })
    }

    #[test]
    fn phase_lifecycle() {
        let mut phase = SessionPhase::default();
        assert_eq!(phase, SessionPhase::Connecting);
        phase.activate().unwrap();
        assert_eq!(phase.to_string(), "Active");
        assert!(phase.activate().is_err());
        phase.begin_close().unwrap();
        assert_eq!(phase, SessionPhase::Closing);
        phase.terminate().unwrap();
        assert!(phase.is_terminated());
        assert!(phase.terminate().is_err());
    }

    #[test]
    fn advance_reports_refused_transitions() {
        let mut phase = SessionPhase::Connecting;
        assert!(phase.active_for().is_none());
        assert!(!advance(&mut phase, SessionPhase::begin_close));
        assert_eq!(phase, SessionPhase::Connecting);

        assert!(advance(&mut phase, SessionPhase::activate));
        assert!(phase.active_for().is_some());
        assert!(advance(&mut phase, SessionPhase::begin_close));
        assert!(!advance(&mut phase, SessionPhase::begin_close));
        assert!(advance(&mut phase, SessionPhase::terminate));
        assert!(!advance(&mut phase, SessionPhase::terminate));
    }

    #[test]
    fn connecting_can_terminate_directly() {
        let mut phase = SessionPhase::Connecting;
        assert!(phase.begin_close().is_err());
        phase.terminate().unwrap();
    }

    #[test]
    fn end_reason_display() {
        assert_eq!(EndReason::Closed.to_string(), "closed");
        assert_eq!(
            EndReason::Failed("refused".into()).to_string(),
            "connection failed : refused"
        );
        assert_eq!(
            EndReason::Lost("reset".into()).to_string(),
            "connection lost : reset"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timer_measures_from_last_update() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path(), 1000);
        let (tx, link) = SessionLink::channel();
        let peer = spawn_acking_peer(tx.clone(), &link);
        let compositor = FrameCompositor::new(100, 100, dir.path().join("a.png"), 85);

        let start = TokioInstant::now();
        let feeder = tokio::spawn(async move {
            tx.send(SessionEvent::Ready).await.unwrap();
            tx.send(update(0, 0, 10, 10, [1, 1, 1])).await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
            tx.send(update(10, 10, 10, 10, [2, 2, 2])).await.unwrap();
            tx
        });

        let outcome = drive_session(link, compositor, &settings).await;
        let closed_at = peer.await.unwrap();
        drop(feeder.await.unwrap());

        // Last update at t=500ms, timeout 1s: close at t=1500ms, not 1000ms.
        let elapsed = closed_at - start;
        assert!(elapsed >= Duration::from_millis(1500), "closed too early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1600), "closed too late: {elapsed:?}");
        assert_eq!(outcome.reason, EndReason::Closed);
        assert_eq!(outcome.updates_applied, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn no_timer_before_first_update() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path(), 100);
        let (tx, link) = SessionLink::channel();
        let control = link.control.clone();
        let compositor = FrameCompositor::new(100, 100, dir.path().join("b.png"), 85);

        let feeder = tokio::spawn(async move {
            tx.send(SessionEvent::Ready).await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
            assert!(!control.close_requested());
            tx.send(SessionEvent::Lost("server went away".into())).await.unwrap();
        });

        let outcome = drive_session(link, compositor, &settings).await;
        feeder.await.unwrap();
        assert_eq!(outcome.reason, EndReason::Lost("server went away".into()));
        // Lost sessions still save what they have.
        assert!(matches!(outcome.saved, Saved::Written(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn unresponsive_peer_is_closed_after_grace() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path(), 100);
        let (tx, link) = SessionLink::channel();
        let compositor = FrameCompositor::new(100, 100, dir.path().join("c.png"), 85);

        tx.send(update(0, 0, 5, 5, [9, 9, 9])).await.unwrap();
        let start = TokioInstant::now();
        let outcome = drive_session(link, compositor, &settings).await;

        assert_eq!(outcome.reason, EndReason::Closed);
        assert!(TokioInstant::now() - start >= Duration::from_millis(600));
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_single_block_forced_close() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path(), 1000);
        let (tx, link) = SessionLink::channel();
        let peer = spawn_acking_peer(tx.clone(), &link);
        let path = dir.path().join("host.png");
        let compositor = FrameCompositor::new(100, 100, &path, 85);

        tx.send(SessionEvent::Ready).await.unwrap();
        tx.send(update(0, 0, 50, 50, [200, 30, 60])).await.unwrap();

        let start = TokioInstant::now();
        let outcome = drive_session(link, compositor, &settings).await;
        let closed_at = peer.await.unwrap();
        let elapsed = closed_at - start;
        assert!(elapsed >= Duration::from_millis(1000) && elapsed < Duration::from_millis(1010));
        assert_eq!(outcome.saved, Saved::Written(path.clone()));

        let saved = image::open(&path).unwrap().to_rgb8();
        assert_eq!(saved.get_pixel(0, 0).0, [200, 30, 60]);
        assert_eq!(saved.get_pixel(49, 49).0, [200, 30, 60]);
        assert_eq!(saved.get_pixel(50, 0).0, [0, 0, 0]);
        assert_eq!(saved.get_pixel(99, 99).0, [0, 0, 0]);
    }

    #[tokio::test]
    async fn failed_connect_writes_nothing() {
        struct Refusing;

        #[async_trait::async_trait]
        impl ProtocolClient for Refusing {
            async fn connect(&self, _: ConnectRequest) -> Result<SessionLink, CaptureError> {
                Err(CaptureError::Other("refused".into()))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path(), 100);
        let target = Target::new("10.9.9.9", 3389);
        let outcome = run_session(Arc::new(Refusing), target.clone(), settings.clone()).await;

        assert_eq!(outcome.reason, EndReason::Failed("refused".into()));
        assert_eq!(outcome.saved, Saved::NotAttempted);
        assert!(!settings.output_path(&target).exists());
    }
}

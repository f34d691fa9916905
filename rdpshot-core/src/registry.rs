//! Tracks live sessions and decides when the process is done.
//!
//! Each session runs as its own task and reports back exactly once over
//! the registry's channel. The registry only ever mutates from the loop
//! that drains that channel, so the live count needs no locking.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

use crate::protocol::ProtocolClient;
use crate::session::{EndReason, Saved, SessionOutcome, SessionSettings, run_session};
use crate::target::Target;

/// Identifies a session within one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Returned by [`SessionRegistry::open_session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub id: SessionId,
    pub target: Target,
}

/// Message a session task sends when it is over.
#[derive(Debug)]
pub struct SessionEnded {
    pub id: SessionId,
    pub outcome: SessionOutcome,
}

/// What the registry made of a session ending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndDisposition {
    /// Unknown id or already ended; nothing was counted.
    Ignored,
    /// Counted; this many sessions are still live.
    Remaining(usize),
    /// Counted, and it was the last one: shutdown has been signalled.
    Shutdown,
}

/// Totals for a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    pub closed: usize,
    pub failed: usize,
    pub lost: usize,
    pub saved: Vec<PathBuf>,
    pub save_failures: usize,
}

impl CaptureSummary {
    fn record(&mut self, outcome: &SessionOutcome) {
        match outcome.reason {
            EndReason::Closed => self.closed += 1,
            EndReason::Failed(_) => self.failed += 1,
            EndReason::Lost(_) => self.lost += 1,
        }
        match &outcome.saved {
            Saved::Written(path) => self.saved.push(path.clone()),
            Saved::Failed(_) => self.save_failures += 1,
            Saved::NotAttempted => {}
        }
    }

    pub fn ended(&self) -> usize {
        self.closed + self.failed + self.lost
    }
}

// ── SessionRegistry ──────────────────────────────────────────────

pub struct SessionRegistry {
    live: HashMap<SessionId, Target>,
    next_id: u64,
    ended_tx: mpsc::UnboundedSender<SessionEnded>,
    ended_rx: mpsc::UnboundedReceiver<SessionEnded>,
    shutdown: CancellationToken,
    summary: CaptureSummary,
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        Self {
            live: HashMap::new(),
            next_id: 1,
            ended_tx,
            ended_rx,
            shutdown: CancellationToken::new(),
            summary: CaptureSummary::default(),
        }
    }

    /// Number of sessions that have been opened and not yet ended.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Cancelled exactly once, when the last live session ends.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Register a session without starting anything.
    ///
    /// [`open_session`](Self::open_session) uses this; it is public so a
    /// caller with its own task model can still use the counting and
    /// shutdown logic.
    pub fn register(&mut self, target: Target) -> SessionHandle {
        let id = SessionId(self.next_id);
        self.next_id += 1;
        self.live.insert(id, target.clone());
        SessionHandle { id, target }
    }

    /// Count a new session and start connecting to `target`.
    pub fn open_session(
        &mut self,
        client: Arc<dyn ProtocolClient>,
        target: Target,
        settings: SessionSettings,
    ) -> SessionHandle {
        let handle = self.register(target);
        let ended_tx = self.ended_tx.clone();
        let id = handle.id;
        let span = info_span!("session", id = id.0, target = %handle.target);
        let target = handle.target.clone();

        // The session runs in its own task so a panic inside it still
        // produces exactly one report.
        let session = tokio::spawn(run_session(client, target, settings).instrument(span.clone()));
        tokio::spawn(
            async move {
                let outcome = session.await.unwrap_or_else(|join| {
                    let reason = if join.is_panic() {
                        "session task panicked"
                    } else {
                        "session task cancelled"
                    };
                    error!("{reason}");
                    SessionOutcome {
                        reason: EndReason::Lost(reason.into()),
                        saved: Saved::NotAttempted,
                        updates_applied: 0,
                    }
                });
                let _ = ended_tx.send(SessionEnded { id, outcome });
            }
            .instrument(span),
        );

        handle
    }

    /// Account for a session that has ended.
    pub fn on_session_ended(&mut self, id: SessionId, reason: &EndReason) -> EndDisposition {
        let Some(target) = self.live.remove(&id) else {
            warn!(session = %id, "ignoring duplicate end ({reason})");
            return EndDisposition::Ignored;
        };

        match reason {
            EndReason::Closed => info!(session = %id, "{target}: {reason}"),
            EndReason::Failed(_) | EndReason::Lost(_) => warn!(session = %id, "{target}: {reason}"),
        }

        if self.live.is_empty() {
            self.shutdown.cancel();
            EndDisposition::Shutdown
        } else {
            EndDisposition::Remaining(self.live.len())
        }
    }

    /// Process session reports until every opened session has ended.
    ///
    /// With nothing open it returns immediately, cancelling the shutdown
    /// token on the way out.
    pub async fn run_until_shutdown(&mut self) -> CaptureSummary {
        while !self.live.is_empty() {
            let Some(ended) = self.ended_rx.recv().await else {
                // Cannot happen while we hold a sender, but don't spin.
                break;
            };
            self.summary.record(&ended.outcome);
            if self.on_session_ended(ended.id, &ended.outcome.reason) == EndDisposition::Shutdown {
                break;
            }
        }

        self.shutdown.cancel();
        info!(
            closed = self.summary.closed,
            failed = self.summary.failed,
            lost = self.summary.lost,
            saved = self.summary.saved.len(),
            "all sessions ended"
        );
        self.summary.clone()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Open one session per target and wait for all of them to end.
pub async fn capture_all(
    client: Arc<dyn ProtocolClient>,
    targets: impl IntoIterator<Item = Target>,
    settings: SessionSettings,
) -> CaptureSummary {
    let mut registry = SessionRegistry::new();
    for target in targets {
        registry.open_session(Arc::clone(&client), target, settings.clone());
    }
    registry.run_until_shutdown().await
}

// ── Tests ────────────────────────────────────────────────────────

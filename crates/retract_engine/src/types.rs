use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use retract_core::{HaltReason, MatchReason, TargetSet, WithdrawalRecord};
use thiserror::Error;

use crate::session::SessionError;

/// Failure of a single withdrawal attempt. Caught at the card boundary
/// so one bad card never aborts the batch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CardFault {
    /// The matched card exposed no withdraw control.
    #[error("no withdraw control on card")]
    ActionUnavailable,
    /// The confirmation step did not complete.
    #[error("confirmation failed: {0}")]
    ConfirmFailed(String),
    /// No prompt appeared and the card was still rendered at re-check.
    #[error("card still present after withdraw click")]
    StillPresent,
}

/// A matched candidate whose withdrawal did not complete. It stays in
/// the pending set so a later run can retry it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAttempt {
    pub identity: String,
    pub display_name: Option<String>,
    pub fault: CardFault,
}

/// Outcome of a completed withdrawal run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawReport {
    /// Successfully withdrawn invitations, in completion order.
    pub withdrawn: Vec<WithdrawalRecord>,
    /// Attempts that failed at the card level.
    pub failed: Vec<FailedAttempt>,
    /// Targets never found or never completed.
    pub unresolved: TargetSet,
    pub halt: HaltReason,
    pub cycles_run: u32,
}

/// List-level failures. These are the only errors that abort a run.
#[derive(Debug, Error)]
pub enum ListError {
    /// No card appeared within the readiness window after navigation.
    #[error("invitation list not ready within {0:?}")]
    NotReady(Duration),
    /// The browser session failed outside any single card.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// A run that aborted mid-way. Everything accumulated before the
/// failure is carried along so callers can persist partial results.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct WithdrawFailure {
    #[source]
    pub error: ListError,
    pub withdrawn: Vec<WithdrawalRecord>,
    pub failed: Vec<FailedAttempt>,
    pub unresolved: TargetSet,
}

/// Advisory progress notifications. Losing one affects nothing but the
/// operator's view of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A pending target was found among the rendered cards.
    CandidateMatched {
        identity: String,
        display_name: Option<String>,
        reason: MatchReason,
    },
    /// A withdrawal completed, either confirmed or verified by the
    /// card's disappearance.
    WithdrawalConfirmed { identity: String },
    /// The withdraw control was clicked but no prompt appeared;
    /// verification is deferred to the next snapshot.
    WithdrawalUnverified { identity: String },
    WithdrawalFailed { identity: String, fault: CardFault },
    /// A card was passed over this cycle, e.g. its fields were
    /// unreadable mid-render.
    CandidateSkipped { detail: String },
    CycleFinished {
        cycle: u32,
        cards_seen: usize,
        new_candidates: usize,
        extent: u64,
    },
    Halted { reason: HaltReason },
}

/// Receives engine events as they happen.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// Forwards events over a channel. Send failures are ignored since
/// events are advisory.
pub struct ChannelProgressSink {
    tx: mpsc::Sender<EngineEvent>,
}

impl ChannelProgressSink {
    pub fn new(tx: mpsc::Sender<EngineEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelProgressSink {
    fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn emit(&self, _event: EngineEvent) {}
}

/// Cooperative cancellation. The engine checks it between cards and
/// between cycles, so the current step always finishes cleanly.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::Relaxed)
    }
}

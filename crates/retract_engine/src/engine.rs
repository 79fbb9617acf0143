use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use engine_logging::{engine_debug, engine_error, engine_info, engine_warn};
use retract_core::{
    match_candidate, Candidate, CycleObservation, HaltReason, LoopDecision, LoopLimits,
    ProcessedSet, ProgressState, TargetSet, WithdrawalRecord,
};
use tokio::time::sleep;

use crate::scan;
use crate::selectors::{click_in_card_chain, click_on_page_chain, SiteProfile};
use crate::session::{CardHandle, ListSession};
use crate::types::{
    CancelFlag, CardFault, EngineEvent, FailedAttempt, ListError, ProgressSink, WithdrawFailure,
    WithdrawReport,
};

/// Tunables for one run. The defaults mirror a human-paced session
/// against the reference site.
#[derive(Debug, Clone)]
pub struct WithdrawSettings {
    pub limits: LoopLimits,
    /// How long to wait for the first card after navigation.
    pub list_ready_timeout: Duration,
    /// Pause after readiness so the client-side render finishes.
    pub initial_settle: Duration,
    /// Grace window for the confirmation prompt to appear.
    pub confirm_timeout: Duration,
    /// How long the prompt may take to close after confirming.
    pub dialog_close_timeout: Duration,
    /// Pause after each completed withdrawal.
    pub post_action_delay: Duration,
    /// Pause after each lazy-load trigger.
    pub load_settle: Duration,
    /// Extra lazy-load cycles when scanning for export.
    pub scan_load_cycles: u32,
    /// Stop after this many successful withdrawals, if set.
    pub max_withdrawals: Option<usize>,
}

impl Default for WithdrawSettings {
    fn default() -> Self {
        Self {
            limits: LoopLimits::default(),
            list_ready_timeout: Duration::from_secs(20),
            initial_settle: Duration::from_secs(3),
            confirm_timeout: Duration::from_secs(10),
            dialog_close_timeout: Duration::from_secs(10),
            post_action_delay: Duration::from_secs(2),
            load_settle: Duration::from_secs(3),
            scan_load_cycles: 0,
            max_withdrawals: None,
        }
    }
}

/// Outcome of a single card's withdrawal attempt.
enum Attempt {
    /// Prompt confirmed and closed.
    Withdrawn,
    /// No prompt appeared; verification deferred to the next snapshot.
    Unverified,
    Failed(CardFault),
    /// Transient trouble before anything was clicked; not processed, so
    /// the card gets another chance on a later snapshot.
    Skipped(String),
}

/// Mutable state of one run, threaded through the loop.
#[derive(Default)]
struct RunState {
    progress: ProgressState,
    processed: ProcessedSet,
    /// Identities seen in any snapshot so far, for novelty counting.
    seen: BTreeSet<String>,
    /// Unverified withdrawals awaiting a presence re-check.
    provisional: Vec<Candidate>,
    withdrawn: Vec<WithdrawalRecord>,
    failed: Vec<FailedAttempt>,
}

/// Drives the reconciliation loop: snapshot the rendered cards, match
/// them against the pending targets, withdraw one at a time, pull the
/// next batch into view, and decide whether to keep going.
pub struct WithdrawEngine {
    profile: SiteProfile,
    settings: WithdrawSettings,
    cancel: CancelFlag,
    clock: Arc<dyn Fn() -> String + Send + Sync>,
}

impl WithdrawEngine {
    pub fn new(profile: SiteProfile, settings: WithdrawSettings) -> Self {
        Self {
            profile,
            settings,
            cancel: CancelFlag::new(),
            clock: Arc::new(|| Utc::now().to_rfc3339()),
        }
    }

    /// Replace the completion-timestamp clock, mainly for tests.
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> String + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    /// Handle for requesting cancellation from another task.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    /// Withdraws every invitation matching `targets` that the list will
    /// reveal, then reports what happened. A list-level failure aborts
    /// the run but keeps everything completed so far.
    pub async fn withdraw<S: ListSession>(
        &self,
        session: &mut S,
        mut targets: TargetSet,
        sink: &dyn ProgressSink,
    ) -> Result<WithdrawReport, WithdrawFailure> {
        let mut run = RunState::default();
        if targets.is_complete() {
            // An empty request never touches the page.
            return Ok(Self::report(run, targets, HaltReason::Complete));
        }
        match self.run_withdraw(session, &mut targets, &mut run, sink).await {
            Ok(halt) => {
                engine_info!(
                    "run halted: {halt} ({} withdrawn, {} failed)",
                    run.withdrawn.len(),
                    run.failed.len()
                );
                sink.emit(EngineEvent::Halted { reason: halt });
                Ok(Self::report(run, targets, halt))
            }
            Err(error) => {
                engine_error!("run aborted: {error}");
                // Attempts still awaiting verification cannot be settled
                // once the session is gone; account for them as failed.
                for candidate in std::mem::take(&mut run.provisional) {
                    run.failed.push(FailedAttempt {
                        identity: candidate.identity,
                        display_name: candidate.display_name,
                        fault: CardFault::ConfirmFailed("run aborted before verification".into()),
                    });
                }
                Err(WithdrawFailure {
                    error,
                    withdrawn: run.withdrawn,
                    failed: run.failed,
                    unresolved: targets,
                })
            }
        }
    }

    /// Scans the list without touching anything, for export. Honors
    /// `scan_load_cycles` extra lazy-loads to reach deeper batches.
    pub async fn collect<S: ListSession>(
        &self,
        session: &mut S,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<Candidate>, ListError> {
        self.await_ready(session).await?;
        let mut collected = Vec::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        for cycle in 0..=self.settings.scan_load_cycles {
            if cycle > 0 {
                session.trigger_lazy_load().await?;
                sleep(self.settings.load_settle).await;
            }
            let snapshot = scan::snapshot_candidates(session, &self.profile, sink).await?;
            let cards_seen = snapshot.len();
            let mut new_candidates = 0usize;
            for (_, candidate) in snapshot {
                if seen.insert(candidate.identity.clone()) {
                    new_candidates += 1;
                    collected.push(candidate);
                }
            }
            let extent = session.measure_extent().await?;
            sink.emit(EngineEvent::CycleFinished {
                cycle,
                cards_seen,
                new_candidates,
                extent,
            });
        }
        engine_info!("collected {} unique candidates", collected.len());
        Ok(collected)
    }

    async fn run_withdraw<S: ListSession>(
        &self,
        session: &mut S,
        targets: &mut TargetSet,
        run: &mut RunState,
        sink: &dyn ProgressSink,
    ) -> Result<HaltReason, ListError> {
        self.await_ready(session).await?;
        let mut last_extent = session.measure_extent().await?;

        loop {
            // 1) Snapshot the rendered cards.
            let snapshot = scan::snapshot_candidates(session, &self.profile, sink).await?;
            let cards_seen = snapshot.len();
            let current: BTreeSet<String> = snapshot
                .iter()
                .map(|(_, candidate)| candidate.identity.clone())
                .collect();

            // 2) Settle earlier no-prompt attempts against what is
            //    rendered now.
            self.resolve_provisionals(&current, targets, run, sink);

            let mut new_candidates = 0usize;
            for (_, candidate) in &snapshot {
                if run.seen.insert(candidate.identity.clone()) {
                    new_candidates += 1;
                }
            }

            // 3) Withdraw matches one at a time. The list mutates under
            //    us after every success, so only handles from this
            //    snapshot are ever used, and never after a reload.
            let mut matches = 0usize;
            for (handle, candidate) in &snapshot {
                if targets.is_complete()
                    || self.limit_reached(&run.progress)
                    || self.cancel.is_cancelled()
                {
                    break;
                }
                let Some(reason) = match_candidate(targets, &run.processed, candidate) else {
                    continue;
                };
                matches += 1;
                engine_info!("matched {} via {}", candidate.identity, reason);
                sink.emit(EngineEvent::CandidateMatched {
                    identity: candidate.identity.clone(),
                    display_name: candidate.display_name.clone(),
                    reason,
                });
                run.progress.record_attempt();
                match self.attempt_withdraw(session, *handle).await {
                    Attempt::Withdrawn => {
                        self.complete_withdrawal(candidate, targets, run, sink);
                    }
                    Attempt::Unverified => {
                        run.processed.insert(&candidate.identity);
                        run.provisional.push(candidate.clone());
                        engine_warn!(
                            "no confirmation prompt for {}; verifying on the next snapshot",
                            candidate.identity
                        );
                        sink.emit(EngineEvent::WithdrawalUnverified {
                            identity: candidate.identity.clone(),
                        });
                    }
                    Attempt::Failed(fault) => {
                        run.processed.insert(&candidate.identity);
                        engine_warn!("withdrawal failed for {}: {}", candidate.identity, fault);
                        sink.emit(EngineEvent::WithdrawalFailed {
                            identity: candidate.identity.clone(),
                            fault: fault.clone(),
                        });
                        run.failed.push(FailedAttempt {
                            identity: candidate.identity.clone(),
                            display_name: candidate.display_name.clone(),
                            fault,
                        });
                    }
                    Attempt::Skipped(detail) => {
                        engine_debug!("skipping card this cycle: {detail}");
                        sink.emit(EngineEvent::CandidateSkipped { detail });
                    }
                }
            }

            // 4) Terminal checks before loading more.
            if targets.is_complete() {
                self.final_resolve(session, targets, run, sink).await;
                return Ok(HaltReason::Complete);
            }
            if self.limit_reached(&run.progress) {
                self.final_resolve(session, targets, run, sink).await;
                return Ok(HaltReason::LimitReached);
            }
            if self.cancel.is_cancelled() {
                self.final_resolve(session, targets, run, sink).await;
                return Ok(HaltReason::Cancelled);
            }

            // 5) Pull the next batch into view and let the list settle.
            session.trigger_lazy_load().await?;
            sleep(self.settings.load_settle).await;
            let extent = session.measure_extent().await?;
            let observation = CycleObservation {
                new_candidates,
                matches,
                extent_grew: extent > last_extent,
            };
            last_extent = extent;
            run.progress.observe_cycle(observation);
            engine_debug!(
                "cycle {}: {} cards, {} new, {} matched, extent {}",
                run.progress.cycles_run,
                cards_seen,
                new_candidates,
                matches,
                extent
            );
            sink.emit(EngineEvent::CycleFinished {
                cycle: run.progress.cycles_run,
                cards_seen,
                new_candidates,
                extent,
            });

            if let LoopDecision::Halt(reason) = run.progress.decide(self.settings.limits) {
                self.final_resolve(session, targets, run, sink).await;
                return Ok(reason);
            }
        }
    }

    /// One card's withdrawal: press the card's withdraw control, wait
    /// for the confirmation prompt, confirm, wait for it to close.
    async fn attempt_withdraw<S: ListSession>(
        &self,
        session: &mut S,
        handle: CardHandle,
    ) -> Attempt {
        let clicked = match click_in_card_chain(session, handle, &self.profile.withdraw_click).await
        {
            Ok(clicked) => clicked,
            Err(err) => return Attempt::Skipped(format!("withdraw click failed: {err}")),
        };
        if !clicked {
            return Attempt::Failed(CardFault::ActionUnavailable);
        }

        let dialog = &self.profile.confirm_dialog;
        let prompted = match session
            .wait_for_present(dialog, self.settings.confirm_timeout)
            .await
        {
            Ok(present) => present,
            Err(err) => return Attempt::Failed(CardFault::ConfirmFailed(err.to_string())),
        };
        if !prompted {
            // No prompt within the grace window. The click may still
            // have worked; success is decided by the card disappearing
            // from a later snapshot, never assumed.
            return Attempt::Unverified;
        }

        let confirmed = match click_on_page_chain(session, &self.profile.confirm_click).await {
            Ok(clicked) => clicked,
            Err(err) => {
                self.dismiss_prompt(session).await;
                return Attempt::Failed(CardFault::ConfirmFailed(err.to_string()));
            }
        };
        if !confirmed {
            self.dismiss_prompt(session).await;
            return Attempt::Failed(CardFault::ConfirmFailed("confirm control not found".into()));
        }

        let closed = match session
            .wait_for_absent(dialog, self.settings.dialog_close_timeout)
            .await
        {
            Ok(closed) => closed,
            Err(err) => {
                self.dismiss_prompt(session).await;
                return Attempt::Failed(CardFault::ConfirmFailed(err.to_string()));
            }
        };
        if !closed {
            self.dismiss_prompt(session).await;
            return Attempt::Failed(CardFault::ConfirmFailed("dialog did not close".into()));
        }

        sleep(self.settings.post_action_delay).await;
        Attempt::Withdrawn
    }

    /// Best-effort cancel so a stuck dialog cannot wedge the rest of
    /// the run.
    async fn dismiss_prompt<S: ListSession>(&self, session: &mut S) {
        match click_on_page_chain(session, &self.profile.cancel_click).await {
            Ok(true) => engine_debug!("dismissed a blocking confirmation dialog"),
            Ok(false) => {}
            Err(err) => engine_debug!("could not dismiss confirmation dialog: {err}"),
        }
    }

    /// Settles unverified attempts against the identities rendered in
    /// the latest snapshot: gone means withdrawn, present means the
    /// silent click did nothing.
    fn resolve_provisionals(
        &self,
        current: &BTreeSet<String>,
        targets: &mut TargetSet,
        run: &mut RunState,
        sink: &dyn ProgressSink,
    ) {
        if run.provisional.is_empty() {
            return;
        }
        for candidate in std::mem::take(&mut run.provisional) {
            if current.contains(&candidate.identity) {
                engine_warn!(
                    "{} still present after unprompted withdraw click",
                    candidate.identity
                );
                sink.emit(EngineEvent::WithdrawalFailed {
                    identity: candidate.identity.clone(),
                    fault: CardFault::StillPresent,
                });
                run.failed.push(FailedAttempt {
                    identity: candidate.identity,
                    display_name: candidate.display_name,
                    fault: CardFault::StillPresent,
                });
            } else {
                engine_info!("{} verified withdrawn by disappearance", candidate.identity);
                self.complete_withdrawal(&candidate, targets, run, sink);
            }
        }
    }

    /// Takes one extra snapshot before halting so no attempt is left in
    /// the unverified state. If even the snapshot fails, the attempts
    /// are reported as failed rather than silently dropped.
    async fn final_resolve<S: ListSession>(
        &self,
        session: &mut S,
        targets: &mut TargetSet,
        run: &mut RunState,
        sink: &dyn ProgressSink,
    ) {
        if run.provisional.is_empty() {
            return;
        }
        match scan::snapshot_candidates(session, &self.profile, sink).await {
            Ok(snapshot) => {
                let current: BTreeSet<String> = snapshot
                    .into_iter()
                    .map(|(_, candidate)| candidate.identity)
                    .collect();
                self.resolve_provisionals(&current, targets, run, sink);
            }
            Err(err) => {
                engine_warn!("verification snapshot failed: {err}");
                for candidate in std::mem::take(&mut run.provisional) {
                    let fault =
                        CardFault::ConfirmFailed(format!("verification snapshot failed: {err}"));
                    sink.emit(EngineEvent::WithdrawalFailed {
                        identity: candidate.identity.clone(),
                        fault: fault.clone(),
                    });
                    run.failed.push(FailedAttempt {
                        identity: candidate.identity,
                        display_name: candidate.display_name,
                        fault,
                    });
                }
            }
        }
    }

    fn complete_withdrawal(
        &self,
        candidate: &Candidate,
        targets: &mut TargetSet,
        run: &mut RunState,
        sink: &dyn ProgressSink,
    ) {
        let record = WithdrawalRecord::from_candidate(candidate, (self.clock)());
        run.processed.insert(&candidate.identity);
        targets.mark_withdrawn(candidate);
        run.progress.record_success();
        engine_info!("withdrew {}", candidate.identity);
        sink.emit(EngineEvent::WithdrawalConfirmed {
            identity: candidate.identity.clone(),
        });
        run.withdrawn.push(record);
    }

    async fn await_ready<S: ListSession>(&self, session: &mut S) -> Result<(), ListError> {
        let timeout = self.settings.list_ready_timeout;
        if !session.wait_for_present(&self.profile.card, timeout).await? {
            return Err(ListError::NotReady(timeout));
        }
        // Let the client-side render finish painting the fields.
        sleep(self.settings.initial_settle).await;
        Ok(())
    }

    fn limit_reached(&self, progress: &ProgressState) -> bool {
        self.settings
            .max_withdrawals
            .is_some_and(|cap| progress.successes as usize >= cap)
    }

    fn report(run: RunState, targets: TargetSet, halt: HaltReason) -> WithdrawReport {
        WithdrawReport {
            withdrawn: run.withdrawn,
            failed: run.failed,
            unresolved: targets,
            halt,
            cycles_run: run.progress.cycles_run,
        }
    }
}

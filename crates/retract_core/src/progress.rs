use std::fmt;

/// Why the withdrawal loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// Both pending channels drained: every requested target was handled.
    Complete,
    /// Consecutive cycles saw no new cards, no matches and no list growth.
    Stalled,
    /// The configured load-cycle ceiling was reached.
    CycleLimit,
    /// The per-run withdrawal cap was reached.
    LimitReached,
    /// The cancellation flag was observed between cycles.
    Cancelled,
}

impl HaltReason {
    /// True when the halt consumed the whole target set.
    pub fn is_complete(self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::Complete => write!(f, "complete"),
            HaltReason::Stalled => write!(f, "stalled"),
            HaltReason::CycleLimit => write!(f, "cycle limit"),
            HaltReason::LimitReached => write!(f, "withdrawal limit"),
            HaltReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What one load cycle observed, fed to the halting heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleObservation {
    /// Cards whose identity had not been seen in any earlier snapshot.
    pub new_candidates: usize,
    /// Candidates matched this cycle, whatever their withdrawal outcome.
    pub matches: usize,
    /// Whether the list's measurable extent grew after the lazy-load.
    pub extent_grew: bool,
}

impl CycleObservation {
    /// A stalled cycle shows no forward progress of any kind.
    pub fn is_stalled(&self) -> bool {
        self.new_candidates == 0 && self.matches == 0 && !self.extent_grew
    }
}

/// Loop ceilings. `max_load_cycles` bounds the run against a page that
/// never settles; `stall_cycles` is how many consecutive stalled cycles
/// end it early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopLimits {
    pub max_load_cycles: u32,
    pub stall_cycles: u32,
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self {
            max_load_cycles: 50,
            stall_cycles: 2,
        }
    }
}

/// Continue scrolling, or stop with a reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopDecision {
    Continue,
    Halt(HaltReason),
}

/// Scalar counters for one `withdraw` run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressState {
    pub attempts: u32,
    pub successes: u32,
    pub cycles_run: u32,
    pub stalled_cycles: u32,
}

impl ProgressState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    pub fn record_success(&mut self) {
        self.successes += 1;
    }

    /// Folds a finished cycle into the counters. Any progress resets the
    /// stall streak.
    pub fn observe_cycle(&mut self, observation: CycleObservation) {
        self.cycles_run += 1;
        if observation.is_stalled() {
            self.stalled_cycles += 1;
        } else {
            self.stalled_cycles = 0;
        }
    }

    /// The halting decision for the next iteration. Completion of the
    /// target set is checked by the caller before the cycle machinery runs.
    pub fn decide(&self, limits: LoopLimits) -> LoopDecision {
        if self.stalled_cycles >= limits.stall_cycles.max(1) {
            return LoopDecision::Halt(HaltReason::Stalled);
        }
        if self.cycles_run >= limits.max_load_cycles {
            return LoopDecision::Halt(HaltReason::CycleLimit);
        }
        LoopDecision::Continue
    }
}

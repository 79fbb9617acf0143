//! Retract core: pure matching, target bookkeeping and halting rules.
mod age;
mod candidate;
mod matching;
mod progress;
mod record;
mod target;

pub use age::{parse_sent_age_days, stale_identities};
pub use candidate::{normalize_identity, normalize_name, Candidate, CandidateMeta};
pub use matching::{match_candidate, MatchReason, ProcessedSet};
pub use progress::{CycleObservation, HaltReason, LoopDecision, LoopLimits, ProgressState};
pub use record::WithdrawalRecord;
pub use target::TargetSet;

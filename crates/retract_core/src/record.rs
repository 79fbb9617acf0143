use crate::candidate::Candidate;

/// One successful withdrawal; the engine's append-only output row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalRecord {
    pub identity: String,
    pub display_name: Option<String>,
    pub headline: Option<String>,
    pub time_sent: Option<String>,
    /// RFC 3339 completion timestamp, supplied by the caller's clock.
    pub withdrawn_utc: String,
}

impl WithdrawalRecord {
    /// Snapshots a candidate at completion time.
    pub fn from_candidate(candidate: &Candidate, withdrawn_utc: String) -> Self {
        Self {
            identity: candidate.identity.clone(),
            display_name: candidate.display_name.clone(),
            headline: candidate.meta.headline.clone(),
            time_sent: candidate.meta.time_sent.clone(),
            withdrawn_utc,
        }
    }
}

use std::collections::BTreeSet;
use std::fmt;

use crate::candidate::Candidate;
use crate::target::TargetSet;

/// Which channel matched a candidate to the target set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchReason {
    /// Profile URL found on the identity channel.
    Identity,
    /// Display name found on the name channel.
    Name,
}

impl fmt::Display for MatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchReason::Identity => write!(f, "identity"),
            MatchReason::Name => write!(f, "name"),
        }
    }
}

/// Identities already attempted this run, successfully or not.
///
/// A processed identity never matches again, even when its card re-renders
/// after the list mutates underneath the loop.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessedSet {
    identities: BTreeSet<String>,
}

impl ProcessedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, identity: &str) {
        self.identities.insert(identity.to_string());
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.identities.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

/// The match rule: identity channel first, then name channel.
///
/// The first rule that applies wins, so one candidate counts once even
/// when both channels would hit. Unmatched candidates return `None`, the
/// ordinary case for most cards in the list.
pub fn match_candidate(
    targets: &TargetSet,
    processed: &ProcessedSet,
    candidate: &Candidate,
) -> Option<MatchReason> {
    if processed.contains(&candidate.identity) {
        return None;
    }
    if targets.contains_identity(&candidate.identity) {
        return Some(MatchReason::Identity);
    }
    if let Some(name_key) = candidate.name_key() {
        if targets.contains_name_key(&name_key) {
            return Some(MatchReason::Name);
        }
    }
    None
}

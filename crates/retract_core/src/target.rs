use std::collections::BTreeSet;

use crate::candidate::{normalize_identity, normalize_name, Candidate};

/// The work queue: identities and names still to withdraw.
///
/// Two channels feed it: profile URLs (primary) and display names
/// (secondary). A confirmed withdrawal clears the candidate from **both**
/// channels regardless of which one matched, so an invitation matched by
/// name can never be processed a second time when its URL scrolls into
/// view later.
///
/// Keys are stored canonical (see [`normalize_identity`] and
/// [`normalize_name`]); ordered sets keep reports deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TargetSet {
    by_identity: BTreeSet<String>,
    by_name: BTreeSet<String>,
}

impl TargetSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a profile URL on the identity channel. Blank input is ignored.
    pub fn insert_identity(&mut self, raw: &str) {
        let key = normalize_identity(raw);
        if !key.is_empty() {
            self.by_identity.insert(key);
        }
    }

    /// Queue a display name on the secondary channel. Blank input is ignored.
    pub fn insert_name(&mut self, raw: &str) {
        let key = normalize_name(raw);
        if !key.is_empty() {
            self.by_name.insert(key);
        }
    }

    /// Builds a target set from bare identities, leaving the name channel
    /// empty. Used by the age filter, where adding names would risk pulling
    /// in an unrelated person who happens to share one.
    pub fn from_identities<I, S>(identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for identity in identities {
            set.insert_identity(identity.as_ref());
        }
        set
    }

    /// Membership test on the identity channel. Expects a canonical key,
    /// which every [`Candidate`] carries by construction.
    pub fn contains_identity(&self, identity: &str) -> bool {
        self.by_identity.contains(identity)
    }

    /// Membership test on the name channel. Expects a canonical key.
    pub fn contains_name_key(&self, name_key: &str) -> bool {
        self.by_name.contains(name_key)
    }

    /// Clears a withdrawn candidate from both channels.
    pub fn mark_withdrawn(&mut self, candidate: &Candidate) {
        self.by_identity.remove(&candidate.identity);
        if let Some(key) = candidate.name_key() {
            self.by_name.remove(&key);
        }
    }

    /// True when both channels are empty: nothing left to do.
    pub fn is_complete(&self) -> bool {
        self.by_identity.is_empty() && self.by_name.is_empty()
    }

    /// Remaining queue sizes as `(identities, names)`.
    pub fn remaining(&self) -> (usize, usize) {
        (self.by_identity.len(), self.by_name.len())
    }

    /// Identities still pending, in sorted order.
    pub fn pending_identities(&self) -> impl Iterator<Item = &str> {
        self.by_identity.iter().map(String::as_str)
    }

    /// Name keys still pending, in sorted order.
    pub fn pending_names(&self) -> impl Iterator<Item = &str> {
        self.by_name.iter().map(String::as_str)
    }
}

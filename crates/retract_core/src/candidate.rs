use url::Url;

/// Free-form card metadata carried through to records and exports.
/// Never consulted by the match rules.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CandidateMeta {
    pub headline: Option<String>,
    pub time_sent: Option<String>,
}

/// One sent invitation as rendered in the list at snapshot time.
///
/// Candidates are transient: they describe a card in a single snapshot and
/// are rebuilt from scratch after every list mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Canonical profile URL; the primary match key.
    pub identity: String,
    /// Secondary match key, compared case-insensitively.
    pub display_name: Option<String>,
    pub meta: CandidateMeta,
}

impl Candidate {
    /// Builds a candidate, normalizing the identity on the way in.
    pub fn new(identity: &str, display_name: Option<String>, meta: CandidateMeta) -> Self {
        Self {
            identity: normalize_identity(identity),
            display_name: display_name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty()),
            meta,
        }
    }

    /// Lowercased name used by the secondary match channel.
    pub fn name_key(&self) -> Option<String> {
        self.display_name.as_deref().map(normalize_name)
    }
}

/// Canonical form of a profile URL used as a match/dedupe key.
///
/// Parsing lowercases scheme and host; the query and fragment are dropped
/// and trailing slashes trimmed, so spreadsheet-edited links and live
/// hrefs compare equal. Unparseable input falls back to the trimmed text,
/// which keeps opaque identifiers usable as keys.
pub fn normalize_identity(raw: &str) -> String {
    let trimmed = raw.trim();
    let canonical = match Url::parse(trimmed) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => trimmed.to_string(),
    };
    canonical.trim_end_matches('/').to_string()
}

/// Canonical form of a display name: trimmed and lowercased.
pub fn normalize_name(raw: &str) -> String {
    raw.trim().to_lowercase()
}

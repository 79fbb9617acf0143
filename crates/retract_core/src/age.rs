use crate::candidate::Candidate;

/// Parses free-form "Sent N <unit> ago" text into an age in days.
///
/// Returns `None` for blank text (age unknown, never matches a filter).
/// Text without a number, such as "Sent today", parses as zero days;
/// "yesterday" counts as one. Units map day -> n, week -> 7n,
/// month -> 30n, year -> 365n; an unrecognized unit parses as zero.
pub fn parse_sent_age_days(text: &str) -> Option<u32> {
    let lowered = text.trim().to_lowercase();
    if lowered.is_empty() {
        return None;
    }
    let Some(number) = first_number(&lowered) else {
        return Some(u32::from(lowered.contains("yesterday")));
    };
    let days = if lowered.contains("day") {
        number
    } else if lowered.contains("week") {
        number.saturating_mul(7)
    } else if lowered.contains("month") {
        number.saturating_mul(30)
    } else if lowered.contains("year") {
        number.saturating_mul(365)
    } else {
        0
    };
    Some(days)
}

/// Identities of candidates whose sent-age parses to at least
/// `min_days`. Candidates with an unknown age never qualify, so a card
/// whose timestamp failed to render cannot be withdrawn by accident.
pub fn stale_identities(candidates: &[Candidate], min_days: u32) -> Vec<&str> {
    candidates
        .iter()
        .filter(|candidate| {
            candidate
                .meta
                .time_sent
                .as_deref()
                .and_then(parse_sent_age_days)
                .is_some_and(|days| days >= min_days)
        })
        .map(|candidate| candidate.identity.as_str())
        .collect()
}

/// First contiguous digit run in the text, if any.
fn first_number(text: &str) -> Option<u32> {
    let mut digits = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else if !digits.is_empty() {
            break;
        }
    }
    digits.parse().ok()
}

use engine_logging::engine_debug;
use retract_core::{Candidate, CandidateMeta};
use thiserror::Error;

use crate::selectors::{extract_field, SiteProfile};
use crate::session::{CardHandle, ListSession, SessionError};
use crate::types::{EngineEvent, ProgressSink};

/// A single card whose fields could not be read. Downgraded to a skip
/// at the snapshot boundary; most such cards are mid-re-render and come
/// back readable on the next pass.
#[derive(Debug, Error)]
pub enum InspectError {
    #[error("no {0} found on card")]
    MissingField(&'static str),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Reads every rendered card into a candidate. Unreadable cards are
/// skipped with an event and do not poison the snapshot; only the
/// card query itself failing is a list-level error.
pub(crate) async fn snapshot_candidates<S: ListSession>(
    session: &mut S,
    profile: &SiteProfile,
    sink: &dyn ProgressSink,
) -> Result<Vec<(CardHandle, Candidate)>, SessionError> {
    let handles = session.snapshot_cards(&profile.card).await?;
    let mut cards = Vec::with_capacity(handles.len());
    for handle in handles {
        match read_candidate(session, profile, handle).await {
            Ok(candidate) => cards.push((handle, candidate)),
            Err(err) => {
                let detail = format!("card {}: {}", handle.index(), err);
                engine_debug!("skipping unreadable card: {detail}");
                sink.emit(EngineEvent::CandidateSkipped { detail });
            }
        }
    }
    Ok(cards)
}

/// Reads one card's fields through the profile's strategy chains. The
/// identity is mandatory; the rest is best-effort metadata.
async fn read_candidate<S: ListSession>(
    session: &mut S,
    profile: &SiteProfile,
    handle: CardHandle,
) -> Result<Candidate, InspectError> {
    let identity = extract_field(session, handle, &profile.identity)
        .await?
        .ok_or(InspectError::MissingField("identity"))?;
    let display_name = extract_field(session, handle, &profile.display_name).await?;
    let headline = extract_field(session, handle, &profile.headline).await?;
    let time_sent = extract_field(session, handle, &profile.time_sent).await?;
    Ok(Candidate::new(
        &identity,
        display_name,
        CandidateMeta {
            headline,
            time_sent,
        },
    ))
}

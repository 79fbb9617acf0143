use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use retract_core::{Candidate, TargetSet, WithdrawalRecord};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::persist::{write_atomic, PersistError};

/// One row of the candidate table, both as exported and as uploaded.
/// Only the profile link is required; everything else is display data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RosterRow {
    pub profile_link: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub headline: String,
    #[serde(default)]
    pub time_sent: String,
}

/// Row of the withdrawn log: the roster schema plus the completion
/// timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawnLogRow {
    pub profile_link: String,
    pub name: String,
    pub headline: String,
    pub time_sent: String,
    pub withdrawn_utc: String,
}

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("could not read roster: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Reads an uploaded roster CSV. Rows without a profile link are
/// dropped; a file missing the `profile_link` column is an error.
pub fn read_roster(path: &Path) -> Result<Vec<RosterRow>, RosterError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for result in reader.deserialize() {
        let row: RosterRow = result?;
        if !row.profile_link.trim().is_empty() {
            rows.push(row);
        }
    }
    Ok(rows)
}

/// Builds the work queue from roster rows: profile links feed the
/// identity channel, names the secondary channel.
pub fn target_set_from_rows(rows: &[RosterRow]) -> TargetSet {
    let mut targets = TargetSet::new();
    for row in rows {
        targets.insert_identity(&row.profile_link);
        targets.insert_name(&row.name);
    }
    targets
}

/// Writes scanned candidates as a roster-shaped CSV, atomically.
/// Returns the full path of the written file.
pub fn write_candidates(
    dir: &Path,
    filename: &str,
    candidates: &[Candidate],
) -> Result<PathBuf, RosterError> {
    let mut buf = Vec::new();
    {
        // Header written by hand so an empty scan still exports the schema.
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(&mut buf);
        writer.write_record(["profile_link", "name", "headline", "time_sent"])?;
        for candidate in candidates {
            writer.serialize(RosterRow {
                profile_link: candidate.identity.clone(),
                name: candidate.display_name.clone().unwrap_or_default(),
                headline: candidate.meta.headline.clone().unwrap_or_default(),
                time_sent: candidate.meta.time_sent.clone().unwrap_or_default(),
            })?;
        }
        writer.flush()?;
    }
    Ok(write_atomic(dir, filename, &buf)?)
}

/// Writes the withdrawn log for one run, atomically.
pub fn write_withdrawal_log(
    dir: &Path,
    filename: &str,
    records: &[WithdrawalRecord],
) -> Result<PathBuf, RosterError> {
    let mut buf = Vec::new();
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(&mut buf);
        writer.write_record(["profile_link", "name", "headline", "time_sent", "withdrawn_utc"])?;
        for record in records {
            writer.serialize(WithdrawnLogRow {
                profile_link: record.identity.clone(),
                name: record.display_name.clone().unwrap_or_default(),
                headline: record.headline.clone().unwrap_or_default(),
                time_sent: record.time_sent.clone().unwrap_or_default(),
                withdrawn_utc: record.withdrawn_utc.clone(),
            })?;
        }
        writer.flush()?;
    }
    Ok(write_atomic(dir, filename, &buf)?)
}

/// Timestamped CSV filename, e.g. `pending_invitations_20260826_093000.csv`.
pub fn timestamped_filename(prefix: &str, now: DateTime<Utc>) -> String {
    format!("{}_{}.csv", prefix, now.format("%Y%m%d_%H%M%S"))
}

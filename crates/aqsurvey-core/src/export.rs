//! # Export Layouts
//!
//! Flattens response records into tabular layouts. Writing CSV or JSON is
//! left to the app; this module only decides rows, columns and cell text.
//!
//! - **Long**: one row per record, in first-write order.
//! - **Wide**: one row per participant, one column per answered field.
//!   Columns are named `step.field`; later iterations of a repeating stage
//!   get `step.field#iteration`.
//! - **Times**: one row per committed step with the time spent on it.

use crate::recorder::ResponseRecord;
use crate::session::ParticipantSession;
use crate::types::ParticipantId;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// One record as a flat row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LongRow {
    pub participant_id: String,
    pub stage: String,
    pub iteration: u32,
    pub step: String,
    pub field_id: String,
    pub value: String,
    pub timestamp_ms: u64,
    pub sequence: u64,
}

impl From<&ResponseRecord> for LongRow {
    fn from(record: &ResponseRecord) -> Self {
        Self {
            participant_id: record.participant_id.to_string(),
            stage: record.stage.clone(),
            iteration: record.iteration,
            step: record.step.clone(),
            field_id: record.field_id.clone(),
            value: record.value.to_cell(),
            timestamp_ms: record.timestamp_ms,
            sequence: record.sequence,
        }
    }
}

/// Long layout ordered by sequence.
#[must_use]
pub fn long_rows(records: &[ResponseRecord]) -> Vec<LongRow> {
    let mut rows: Vec<LongRow> = records.iter().map(LongRow::from).collect();
    rows.sort_by_key(|r| r.sequence);
    rows
}

/// Wide column name of a record.
#[must_use]
pub fn column_name(step: &str, field_id: &str, iteration: u32) -> String {
    if iteration == 0 {
        format!("{}.{}", step, field_id)
    } else {
        format!("{}.{}#{}", step, field_id, iteration)
    }
}

/// One participant's answers keyed by column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WideRow {
    pub participant_id: ParticipantId,
    pub cells: BTreeMap<String, String>,
}

/// Wide layout: ordered columns plus one row per participant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WideTable {
    pub columns: Vec<String>,
    pub rows: Vec<WideRow>,
}

impl WideTable {
    /// Build from records of any number of participants.
    ///
    /// Columns appear in first-write order; rows are sorted by participant.
    #[must_use]
    pub fn from_records(records: &[ResponseRecord]) -> Self {
        let mut ordered: Vec<&ResponseRecord> = records.iter().collect();
        ordered.sort_by_key(|r| r.sequence);

        let mut columns = Vec::new();
        let mut seen = BTreeSet::new();
        let mut rows: BTreeMap<&ParticipantId, BTreeMap<String, String>> = BTreeMap::new();

        for record in ordered {
            let column = column_name(&record.step, &record.field_id, record.iteration);
            if seen.insert(column.clone()) {
                columns.push(column.clone());
            }
            rows.entry(&record.participant_id)
                .or_default()
                .insert(column, record.value.to_cell());
        }

        Self {
            columns,
            rows: rows
                .into_iter()
                .map(|(participant_id, cells)| WideRow {
                    participant_id: participant_id.clone(),
                    cells,
                })
                .collect(),
        }
    }

    /// Header line: `participant_id` followed by the columns.
    #[must_use]
    pub fn header(&self) -> Vec<&str> {
        std::iter::once("participant_id")
            .chain(self.columns.iter().map(String::as_str))
            .collect()
    }

    /// A row's cells in header order; unanswered columns are empty.
    #[must_use]
    pub fn cells<'a>(&'a self, row: &'a WideRow) -> Vec<&'a str> {
        std::iter::once(row.participant_id.as_str())
            .chain(
                self.columns
                    .iter()
                    .map(|c| row.cells.get(c).map_or("", String::as_str)),
            )
            .collect()
    }
}

/// Time spent on one committed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimingRow {
    pub participant_id: String,
    pub stage: String,
    pub iteration: u32,
    pub step: String,
    pub entered_at_ms: u64,
    pub completed_at_ms: u64,
    pub duration_ms: u64,
}

/// Timing rows sorted by participant, then by position on the path.
#[must_use]
pub fn timing_rows<'a>(sessions: impl IntoIterator<Item = &'a ParticipantSession>) -> Vec<TimingRow> {
    let mut ordered: Vec<&ParticipantSession> = sessions.into_iter().collect();
    ordered.sort_by(|a, b| a.participant_id().cmp(b.participant_id()));

    ordered
        .into_iter()
        .flat_map(|session| {
            session.timings().map(move |t| TimingRow {
                participant_id: session.participant_id().to_string(),
                stage: t.stage.clone(),
                iteration: t.iteration,
                step: t.step.clone(),
                entered_at_ms: t.entered_at_ms,
                completed_at_ms: t.completed_at_ms,
                duration_ms: t.duration_ms(),
            })
        })
        .collect()
}

//! # redb-backed Response Storage
//!
//! A disk-backed [`SurveyStore`] using the redb embedded database.
//!
//! Every upsert runs in a single write transaction, so a record, its index
//! entry and the sequence counter are committed together or not at all.
//!
//! ## Tables
//!
//! | Table          | Key                           | Value                     |
//! |----------------|-------------------------------|---------------------------|
//! | `records`      | (participant, sequence)       | encoded `ResponseRecord`  |
//! | `record_index` | (participant, stage, iteration, step, field) | sequence   |
//! | `sessions`     | participant                   | encoded session snapshot  |
//! | `metadata`     | name                          | u64                       |

use crate::formats::{record_from_bytes, record_to_bytes, session_from_bytes, session_to_bytes};
use crate::recorder::{RecordKey, ResponseRecord, SurveyStore};
use crate::session::ParticipantSession;
use crate::types::{FieldValue, ParticipantId, SurveyError};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::collections::BTreeSet;
use std::path::Path;

/// Records keyed by participant then first-write sequence.
const RECORDS: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("records");

/// Record identity -> sequence.
const RECORD_INDEX: TableDefinition<IndexKey<'static>, u64> = TableDefinition::new("record_index");

type IndexKey<'a> = (&'a str, &'a str, u32, &'a str, &'a str);

fn index_key(key: &RecordKey) -> IndexKey<'_> {
    (
        key.participant.as_str(),
        key.stage.as_str(),
        key.iteration,
        key.step.as_str(),
        key.field.as_str(),
    )
}

/// Participant id -> encoded session snapshot.
const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// Counters.
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const NEXT_SEQUENCE: &str = "next_sequence";

fn io<E: std::fmt::Display>(e: E) -> SurveyError {
    SurveyError::IoError(e.to_string())
}

/// A disk-backed record store using redb.
pub struct RedbStore {
    db: Database,
    next_sequence: u64,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore")
            .field("next_sequence", &self.next_sequence)
            .finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SurveyError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        {
            let write_txn = db.begin_write().map_err(io)?;
            let _ = write_txn.open_table(RECORDS).map_err(io)?;
            let _ = write_txn.open_table(RECORD_INDEX).map_err(io)?;
            let _ = write_txn.open_table(SESSIONS).map_err(io)?;
            let _ = write_txn.open_table(METADATA).map_err(io)?;
            write_txn.commit().map_err(io)?;
        }

        let next_sequence = {
            let read_txn = db.begin_read().map_err(io)?;
            let table = read_txn.open_table(METADATA).map_err(io)?;
            table
                .get(NEXT_SEQUENCE)
                .map_err(io)?
                .map(|v| v.value())
                .unwrap_or(0)
        };

        tracing::debug!(path = %path.as_ref().display(), next_sequence, "redb store opened");

        Ok(Self { db, next_sequence })
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<(), SurveyError> {
        self.db.compact().map_err(io)?;
        Ok(())
    }
}

impl SurveyStore for RedbStore {
    fn upsert(
        &mut self,
        key: RecordKey,
        value: FieldValue,
        timestamp_ms: u64,
    ) -> Result<ResponseRecord, SurveyError> {
        let mut next_sequence = self.next_sequence;

        let write_txn = self.db.begin_write().map_err(io)?;
        let record = {
            let mut index = write_txn.open_table(RECORD_INDEX).map_err(io)?;
            let existing = index
                .get(index_key(&key))
                .map_err(io)?
                .map(|v| v.value());

            let sequence = match existing {
                Some(sequence) => sequence,
                None => {
                    let sequence = next_sequence;
                    next_sequence = next_sequence.saturating_add(1);
                    index.insert(index_key(&key), sequence).map_err(io)?;
                    let mut meta = write_txn.open_table(METADATA).map_err(io)?;
                    meta.insert(NEXT_SEQUENCE, next_sequence).map_err(io)?;
                    sequence
                }
            };

            let record = ResponseRecord::from_key(key, value, timestamp_ms, sequence);
            let bytes = record_to_bytes(&record)?;
            let mut records = write_txn.open_table(RECORDS).map_err(io)?;
            records
                .insert((record.participant_id.as_str(), sequence), bytes.as_slice())
                .map_err(io)?;
            record
        };
        write_txn.commit().map_err(io)?;

        self.next_sequence = next_sequence;
        Ok(record)
    }

    fn remove(&mut self, key: &RecordKey) -> Result<bool, SurveyError> {
        let write_txn = self.db.begin_write().map_err(io)?;
        let sequence = {
            let mut index = write_txn.open_table(RECORD_INDEX).map_err(io)?;
            let sequence = index
                .remove(index_key(key))
                .map_err(io)?
                .map(|v| v.value());
            if let Some(sequence) = sequence {
                let mut records = write_txn.open_table(RECORDS).map_err(io)?;
                records
                    .remove((key.participant.as_str(), sequence))
                    .map_err(io)?;
            }
            sequence
        };
        write_txn.commit().map_err(io)?;
        Ok(sequence.is_some())
    }

    fn records_for(&self, participant: &ParticipantId) -> Result<Vec<ResponseRecord>, SurveyError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let table = read_txn.open_table(RECORDS).map_err(io)?;
        let id = participant.as_str();

        let mut records = Vec::new();
        for entry in table.range((id, 0u64)..=(id, u64::MAX)).map_err(io)? {
            let (_, bytes) = entry.map_err(io)?;
            records.push(record_from_bytes(bytes.value())?);
        }
        Ok(records)
    }

    fn participants(&self) -> Result<Vec<ParticipantId>, SurveyError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let table = read_txn.open_table(RECORDS).map_err(io)?;

        let mut ids = BTreeSet::new();
        for entry in table.iter().map_err(io)? {
            let (key, _) = entry.map_err(io)?;
            let (participant, _) = key.value();
            ids.insert(ParticipantId::new(participant));
        }
        Ok(ids.into_iter().collect())
    }

    fn record_count(&self) -> Result<usize, SurveyError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let table = read_txn.open_table(RECORDS).map_err(io)?;
        let count = table.len().map_err(io)?;
        usize::try_from(count).map_err(io)
    }

    fn save_session(&mut self, session: &ParticipantSession) -> Result<(), SurveyError> {
        let bytes = session_to_bytes(session)?;
        let write_txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = write_txn.open_table(SESSIONS).map_err(io)?;
            table
                .insert(session.participant_id().as_str(), bytes.as_slice())
                .map_err(io)?;
        }
        write_txn.commit().map_err(io)?;
        Ok(())
    }

    fn load_sessions(&self) -> Result<Vec<ParticipantSession>, SurveyError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let table = read_txn.open_table(SESSIONS).map_err(io)?;

        let mut sessions = Vec::new();
        for entry in table.iter().map_err(io)? {
            let (_, bytes) = entry.map_err(io)?;
            sessions.push(session_from_bytes(bytes.value())?);
        }
        Ok(sessions)
    }
}

// =============================================================================
// TESTS
// =============================================================================

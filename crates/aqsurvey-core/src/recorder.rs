//! # Response Recorder
//!
//! Keyed log of committed answers, the substrate for CSV/JSON export.
//!
//! There is at most one record per (participant, stage, iteration, step,
//! field). Revisiting a step and committing again replaces the value and
//! timestamp of the existing record but keeps its sequence number, so export
//! order is first-write order. Records of answers that drop out of the
//! participant's path (a field hidden on revisit, a step now skipped) are
//! removed.
//!
//! ## Storage Backends
//!
//! - `InMemory`: [`MemoryStore`] (fast, volatile)
//! - `Persistent`: [`RedbStore`] (ACID, survives restarts, also holds
//!   participant session snapshots)

use crate::session::ParticipantSession;
use crate::storage::RedbStore;
use crate::types::{FieldValue, ParticipantId, SurveyError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

// =============================================================================
// RECORD TYPES
// =============================================================================

/// Identity of a record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub participant: ParticipantId,
    pub stage: String,
    pub iteration: u32,
    pub step: String,
    pub field: String,
}

impl RecordKey {
    #[must_use]
    pub fn new(
        participant: ParticipantId,
        stage: impl Into<String>,
        iteration: u32,
        step: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            participant,
            stage: stage.into(),
            iteration,
            step: step.into(),
            field: field.into(),
        }
    }
}

/// One committed answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub participant_id: ParticipantId,
    pub stage: String,
    pub iteration: u32,
    pub step: String,
    pub field_id: String,
    pub value: FieldValue,
    /// Milliseconds since the Unix epoch of the latest write.
    pub timestamp_ms: u64,
    /// Store-wide first-write order.
    pub sequence: u64,
}

impl ResponseRecord {
    #[must_use]
    pub fn from_key(key: RecordKey, value: FieldValue, timestamp_ms: u64, sequence: u64) -> Self {
        Self {
            participant_id: key.participant,
            stage: key.stage,
            iteration: key.iteration,
            step: key.step,
            field_id: key.field,
            value,
            timestamp_ms,
            sequence,
        }
    }

    #[must_use]
    pub fn key(&self) -> RecordKey {
        RecordKey {
            participant: self.participant_id.clone(),
            stage: self.stage.clone(),
            iteration: self.iteration,
            step: self.step.clone(),
            field: self.field_id.clone(),
        }
    }
}

// =============================================================================
// STORE TRAIT
// =============================================================================

/// Storage for records and session snapshots.
pub trait SurveyStore {
    /// Insert or replace a record, keeping the sequence of an existing one.
    fn upsert(
        &mut self,
        key: RecordKey,
        value: FieldValue,
        timestamp_ms: u64,
    ) -> Result<ResponseRecord, SurveyError>;

    /// Delete a record. Returns whether it existed.
    fn remove(&mut self, key: &RecordKey) -> Result<bool, SurveyError>;

    /// A participant's records ordered by sequence.
    fn records_for(&self, participant: &ParticipantId) -> Result<Vec<ResponseRecord>, SurveyError>;

    /// Participants with at least one record, sorted.
    fn participants(&self) -> Result<Vec<ParticipantId>, SurveyError>;

    fn record_count(&self) -> Result<usize, SurveyError>;

    /// Persist the latest state of a participant session.
    fn save_session(&mut self, session: &ParticipantSession) -> Result<(), SurveyError>;

    /// Every stored session snapshot.
    fn load_sessions(&self) -> Result<Vec<ParticipantSession>, SurveyError>;
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

/// Volatile store backed by `BTreeMap`s.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: BTreeMap<RecordKey, ResponseRecord>,
    sessions: BTreeMap<ParticipantId, ParticipantSession>,
    next_sequence: u64,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SurveyStore for MemoryStore {
    fn upsert(
        &mut self,
        key: RecordKey,
        value: FieldValue,
        timestamp_ms: u64,
    ) -> Result<ResponseRecord, SurveyError> {
        let sequence = match self.records.get(&key) {
            Some(existing) => existing.sequence,
            None => {
                let sequence = self.next_sequence;
                self.next_sequence = self.next_sequence.saturating_add(1);
                sequence
            }
        };
        let record = ResponseRecord::from_key(key.clone(), value, timestamp_ms, sequence);
        self.records.insert(key, record.clone());
        Ok(record)
    }

    fn remove(&mut self, key: &RecordKey) -> Result<bool, SurveyError> {
        Ok(self.records.remove(key).is_some())
    }

    fn records_for(&self, participant: &ParticipantId) -> Result<Vec<ResponseRecord>, SurveyError> {
        let mut records: Vec<ResponseRecord> = self
            .records
            .values()
            .filter(|r| &r.participant_id == participant)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.sequence);
        Ok(records)
    }

    fn participants(&self) -> Result<Vec<ParticipantId>, SurveyError> {
        let mut ids: Vec<ParticipantId> = self.records.keys().map(|k| k.participant.clone()).collect();
        ids.dedup();
        Ok(ids)
    }

    fn record_count(&self) -> Result<usize, SurveyError> {
        Ok(self.records.len())
    }

    fn save_session(&mut self, session: &ParticipantSession) -> Result<(), SurveyError> {
        self.sessions
            .insert(session.participant_id().clone(), session.clone());
        Ok(())
    }

    fn load_sessions(&self) -> Result<Vec<ParticipantSession>, SurveyError> {
        Ok(self.sessions.values().cloned().collect())
    }
}

// =============================================================================
// BACKEND + RECORDER
// =============================================================================

/// Storage backend of a recorder.
#[derive(Debug)]
pub enum StorageBackend {
    /// In-memory store (fast, volatile).
    InMemory(MemoryStore),
    /// Disk-backed store using redb (ACID, persistent).
    Persistent(RedbStore),
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::InMemory(MemoryStore::new())
    }
}

impl StorageBackend {
    fn store(&self) -> &dyn SurveyStore {
        match self {
            Self::InMemory(store) => store,
            Self::Persistent(store) => store,
        }
    }

    fn store_mut(&mut self) -> &mut dyn SurveyStore {
        match self {
            Self::InMemory(store) => store,
            Self::Persistent(store) => store,
        }
    }
}

/// Writes committed answers to a storage backend.
#[derive(Debug, Default)]
pub struct ResponseRecorder {
    backend: StorageBackend,
}

impl ResponseRecorder {
    /// Recorder with in-memory storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorder with persistent redb storage at `path`.
    pub fn with_redb(path: impl AsRef<Path>) -> Result<Self, SurveyError> {
        Ok(Self {
            backend: StorageBackend::Persistent(RedbStore::open(path)?),
        })
    }

    #[must_use]
    pub fn with_backend(backend: StorageBackend) -> Self {
        Self { backend }
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, StorageBackend::Persistent(_))
    }

    /// Record a value stamped with the current wall-clock time.
    pub fn record(&mut self, key: RecordKey, value: FieldValue) -> Result<ResponseRecord, SurveyError> {
        self.record_at(key, value, now_ms())
    }

    /// Record a value with an explicit timestamp.
    pub fn record_at(
        &mut self,
        key: RecordKey,
        value: FieldValue,
        timestamp_ms: u64,
    ) -> Result<ResponseRecord, SurveyError> {
        self.backend.store_mut().upsert(key, value, timestamp_ms)
    }

    /// Drop a record that no longer belongs to the participant's path.
    pub fn remove(&mut self, key: &RecordKey) -> Result<bool, SurveyError> {
        self.backend.store_mut().remove(key)
    }

    /// A participant's records in first-write order.
    pub fn export_for(&self, participant: &ParticipantId) -> Result<Vec<ResponseRecord>, SurveyError> {
        self.backend.store().records_for(participant)
    }

    pub fn participants(&self) -> Result<Vec<ParticipantId>, SurveyError> {
        self.backend.store().participants()
    }

    pub fn record_count(&self) -> Result<usize, SurveyError> {
        self.backend.store().record_count()
    }

    pub fn save_session(&mut self, session: &ParticipantSession) -> Result<(), SurveyError> {
        self.backend.store_mut().save_session(session)
    }

    pub fn load_sessions(&self) -> Result<Vec<ParticipantSession>, SurveyError> {
        self.backend.store().load_sessions()
    }
}

/// Milliseconds since the Unix epoch (0 if the clock is before it).
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn key(participant: &str, step: &str, field: &str) -> RecordKey {
        RecordKey::new(ParticipantId::new(participant), "survey", 0, step, field)
    }

    #[test]
    fn overwrite_keeps_first_sequence() {
        let mut recorder = ResponseRecorder::new();
        recorder
            .record_at(key("p1", "q2", "q2_1"), FieldValue::single("Urban"), 10)
            .expect("first");
        recorder
            .record_at(key("p1", "q3", "q3_1"), FieldValue::single("Kerala"), 20)
            .expect("second");
        let rewritten = recorder
            .record_at(key("p1", "q2", "q2_1"), FieldValue::single("Rural"), 30)
            .expect("rewrite");

        assert_eq!(rewritten.sequence, 0);
        let records = recorder
            .export_for(&ParticipantId::new("p1"))
            .expect("export");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].field_id, "q2_1");
        assert_eq!(records[0].value, FieldValue::single("Rural"));
        assert_eq!(records[0].timestamp_ms, 30);
        assert_eq!(records[1].field_id, "q3_1");
    }

    #[test]
    fn iterations_are_distinct_records() {
        let mut recorder = ResponseRecorder::new();
        for iteration in 0..3 {
            recorder
                .record_at(
                    RecordKey::new(ParticipantId::new("p1"), "guessing", iteration, "guess", "guess_value"),
                    FieldValue::single(iteration.to_string()),
                    u64::from(iteration),
                )
                .expect("record");
        }
        assert_eq!(recorder.record_count(), Ok(3));
    }

    #[test]
    fn export_is_per_participant() {
        let mut recorder = ResponseRecorder::new();
        recorder
            .record_at(key("p1", "q2", "q2_1"), FieldValue::single("Urban"), 1)
            .expect("p1");
        recorder
            .record_at(key("p2", "q2", "q2_1"), FieldValue::single("Rural"), 2)
            .expect("p2");

        let p2 = recorder.export_for(&ParticipantId::new("p2")).expect("export");
        assert_eq!(p2.len(), 1);
        assert_eq!(p2[0].value, FieldValue::single("Rural"));
        assert_eq!(
            recorder.participants().expect("participants"),
            vec![ParticipantId::new("p1"), ParticipantId::new("p2")]
        );
    }

    #[test]
    fn remove_then_rewrite_gets_new_sequence() {
        let mut recorder = ResponseRecorder::new();
        recorder
            .record_at(key("p1", "q5", "Sector"), FieldValue::single("Health"), 1)
            .expect("first");
        recorder
            .record_at(key("p1", "q6", "Commute"), FieldValue::single("Bus"), 2)
            .expect("second");

        assert_eq!(recorder.remove(&key("p1", "q5", "Sector")), Ok(true));
        assert_eq!(recorder.remove(&key("p1", "q5", "Sector")), Ok(false));

        let again = recorder
            .record_at(key("p1", "q5", "Sector"), FieldValue::single("Mining"), 3)
            .expect("again");
        assert_eq!(again.sequence, 2);
        let records = recorder.export_for(&ParticipantId::new("p1")).expect("export");
        let fields: Vec<_> = records.iter().map(|r| r.field_id.as_str()).collect();
        assert_eq!(fields, vec!["Commute", "Sector"]);
    }

    #[test]
    fn in_memory_by_default() {
        assert!(!ResponseRecorder::new().is_persistent());
    }
}

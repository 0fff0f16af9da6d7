//! # Experiment
//!
//! Owns the registry, the barrier, the recorder and every participant
//! session. This is the single entry point the app layer talks to.
//!
//! Every state change is followed by a session snapshot save, so a persistent
//! recorder can resume every participant after a restart. Barrier arrivals
//! are rebuilt from the restored sessions that were parked at a `SYNC` step.

use crate::barrier::SyncBarrier;
use crate::bonus::{BonusAmount, BonusPolicy};
use crate::export::{TimingRow, timing_rows};
use crate::recorder::{ResponseRecord, ResponseRecorder};
use crate::registry::DefinitionRegistry;
use crate::session::{AdvanceOutcome, ParticipantSession, SessionStatus, StepView};
use crate::types::{FieldValue, ParticipantId, Position, SurveyError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Aggregate counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExperimentStatus {
    pub survey: String,
    pub stages: usize,
    pub total_steps: usize,
    pub group_size: usize,
    pub participants: usize,
    pub connected: usize,
    pub waiting: usize,
    pub complete: usize,
    pub records: usize,
    pub persistent: bool,
}

/// A running experiment.
#[derive(Debug)]
pub struct Experiment {
    registry: Arc<DefinitionRegistry>,
    barrier: Arc<SyncBarrier>,
    recorder: ResponseRecorder,
    sessions: BTreeMap<ParticipantId, ParticipantSession>,
}

impl Experiment {
    /// Create an experiment, restoring any sessions the recorder holds.
    ///
    /// `group_size` is the number of participants a `SYNC` step waits for.
    pub fn new(
        registry: DefinitionRegistry,
        group_size: usize,
        recorder: ResponseRecorder,
    ) -> Result<Self, SurveyError> {
        let barrier = Arc::new(SyncBarrier::new(group_size));
        let mut sessions = BTreeMap::new();

        for session in recorder.load_sessions()? {
            if let Some(key) = session.waiting() {
                barrier.arrive(key, session.participant_id())?;
            }
            sessions.insert(session.participant_id().clone(), session);
        }

        if !sessions.is_empty() {
            tracing::info!(restored = sessions.len(), "participant sessions restored");
        }

        Ok(Self {
            registry: Arc::new(registry),
            barrier,
            recorder,
            sessions,
        })
    }

    #[must_use]
    pub fn registry(&self) -> &DefinitionRegistry {
        &self.registry
    }

    #[must_use]
    pub fn barrier(&self) -> &SyncBarrier {
        &self.barrier
    }

    /// Participant ids in sorted order.
    pub fn participant_ids(&self) -> impl Iterator<Item = &ParticipantId> {
        self.sessions.keys()
    }

    pub fn session(&self, participant: &ParticipantId) -> Result<&ParticipantSession, SurveyError> {
        self.sessions
            .get(participant)
            .ok_or_else(|| SurveyError::UnknownParticipant(participant.clone()))
    }

    /// Start a session, or reconnect an existing one.
    pub fn enroll(&mut self, participant: ParticipantId) -> Result<StepView, SurveyError> {
        if self.sessions.contains_key(&participant) {
            return self.reconnect(&participant);
        }

        let mut session = ParticipantSession::new(participant.clone());
        session.start(&self.registry)?;
        self.recorder.save_session(&session)?;
        tracing::info!(participant = %participant, "participant enrolled");

        let view = session.view(&self.registry);
        self.sessions.insert(participant, session);
        Ok(view)
    }

    /// Current step, visible fields and drafts.
    pub fn view(&self, participant: &ParticipantId) -> Result<StepView, SurveyError> {
        Ok(self.session(participant)?.view(&self.registry))
    }

    pub fn set_value(
        &mut self,
        participant: &ParticipantId,
        field_id: &str,
        value: FieldValue,
    ) -> Result<StepView, SurveyError> {
        let session = session_entry(&mut self.sessions, participant)?;
        session.set_value(&self.registry, field_id, value)?;
        self.recorder.save_session(session)?;
        Ok(session.view(&self.registry))
    }

    /// Validate, record and advance (or park at a barrier).
    ///
    /// A `SYNC` release moves every other connected session parked at the
    /// same slot as well.
    pub fn attempt_advance(&mut self, participant: &ParticipantId) -> Result<AdvanceOutcome, SurveyError> {
        let session = session_entry(&mut self.sessions, participant)?;
        let outcome = session.attempt_advance(&self.registry, &mut self.recorder, &self.barrier)?;
        self.recorder.save_session(session)?;

        if !matches!(outcome, AdvanceOutcome::Waiting { .. }) {
            self.release_waiting()?;
        }
        Ok(outcome)
    }

    pub fn rewind(&mut self, participant: &ParticipantId) -> Result<Position, SurveyError> {
        let session = session_entry(&mut self.sessions, participant)?;
        let position = session.rewind(&self.registry)?;
        self.recorder.save_session(session)?;
        Ok(position)
    }

    /// Park a session at its current position.
    pub fn disconnect(&mut self, participant: &ParticipantId) -> Result<StepView, SurveyError> {
        let session = session_entry(&mut self.sessions, participant)?;
        session.disconnect();
        self.recorder.save_session(session)?;
        tracing::info!(participant = %participant, "participant disconnected");
        Ok(session.view(&self.registry))
    }

    /// Resume a parked session; a barrier released meanwhile moves it on.
    pub fn reconnect(&mut self, participant: &ParticipantId) -> Result<StepView, SurveyError> {
        let session = session_entry(&mut self.sessions, participant)?;
        session.reconnect();
        session.poll_barrier(&self.registry, &self.barrier)?;
        self.recorder.save_session(session)?;
        tracing::info!(participant = %participant, "participant reconnected");
        Ok(session.view(&self.registry))
    }

    /// A participant's records in first-write order.
    pub fn export_for(&self, participant: &ParticipantId) -> Result<Vec<ResponseRecord>, SurveyError> {
        self.session(participant)?;
        self.recorder.export_for(participant)
    }

    /// Every record of every participant, in first-write order.
    pub fn export_all(&self) -> Result<Vec<ResponseRecord>, SurveyError> {
        let mut records = Vec::new();
        for participant in self.recorder.participants()? {
            records.extend(self.recorder.export_for(&participant)?);
        }
        records.sort_by_key(|r| r.sequence);
        Ok(records)
    }

    /// Time spent per committed step, every participant.
    #[must_use]
    pub fn timings(&self) -> Vec<TimingRow> {
        timing_rows(self.sessions.values())
    }

    pub fn bonus_for(
        &self,
        participant: &ParticipantId,
        policy: &dyn BonusPolicy,
    ) -> Result<BonusAmount, SurveyError> {
        let complete = self.session(participant)?.is_complete();
        let records = self.recorder.export_for(participant)?;
        Ok(policy.compute(participant, &records, complete))
    }

    pub fn status(&self) -> Result<ExperimentStatus, SurveyError> {
        let count = |status: SessionStatus| {
            self.sessions
                .values()
                .filter(|s| s.status() == status)
                .count()
        };
        Ok(ExperimentStatus {
            survey: self.registry.name().to_string(),
            stages: self.registry.stage_count(),
            total_steps: self.registry.total_steps(),
            group_size: self.barrier.expected(),
            participants: self.sessions.len(),
            connected: self.sessions.values().filter(|s| s.is_connected()).count(),
            waiting: count(SessionStatus::Waiting),
            complete: count(SessionStatus::Complete),
            records: self.recorder.record_count()?,
            persistent: self.recorder.is_persistent(),
        })
    }

    /// Move every connected session whose barrier has released.
    fn release_waiting(&mut self) -> Result<(), SurveyError> {
        for session in self.sessions.values_mut() {
            if session.poll_barrier(&self.registry, &self.barrier)?.is_some() {
                self.recorder.save_session(session)?;
            }
        }
        Ok(())
    }
}

fn session_entry<'a>(
    sessions: &'a mut BTreeMap<ParticipantId, ParticipantSession>,
    participant: &ParticipantId,
) -> Result<&'a mut ParticipantSession, SurveyError> {
    sessions
        .get_mut(participant)
        .ok_or_else(|| SurveyError::UnknownParticipant(participant.clone()))
}

//! # Participant Session
//!
//! One participant's progress through an experiment.
//!
//! A session owns its cursor, the drafts of the step on screen, the answers
//! committed per position, and the participant flags derived from them. It is
//! exclusively owned by the participant's execution context; the only shared
//! resource it touches is the [`SyncBarrier`] passed in by the caller.
//!
//! ## Lifecycle
//!
//! ```text
//! start ─▶ set_value* ─▶ attempt_advance ─┬─ SOLO ─────────────▶ next step
//!                                         └─ SYNC ─▶ waiting ─▶ next step (on release)
//! ```
//!
//! While disconnected or parked at a barrier the session refuses to change.
//! Reconnecting resumes at the same position with drafts intact.
//!
//! Committing a revisited step replaces what was committed there before.
//! Answers that are no longer given lose their records, and so do steps the
//! new answers cause to be skipped.

use crate::barrier::{BarrierKey, BarrierStatus, SyncBarrier};
use crate::cursor::{CursorState, SessionCursor};
use crate::definition::{FieldDefinition, Operand, SkipContext, StepDefinition};
use crate::primitives::{MAX_SELECTIONS, MAX_VALUE_LENGTH};
use crate::recorder::{RecordKey, ResponseRecorder, now_ms};
use crate::registry::DefinitionRegistry;
use crate::types::{FieldValue, ParticipantId, Position, StepRule, SurveyError};
use crate::validation::is_step_complete;
use crate::visibility::{VisibleFields, visible_fields};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;

// =============================================================================
// OUTCOMES & VIEWS
// =============================================================================

/// Result of an advance attempt that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdvanceOutcome {
    /// Moved to a new step.
    Advanced { position: Position },
    /// Answers committed; parked at a `SYNC` barrier.
    Waiting { arrived: usize, expected: usize },
    /// The last step was completed.
    Complete,
}

/// Coarse session status for the rendering layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    InStep,
    Waiting,
    Disconnected,
    Complete,
}

/// Everything a rendering layer needs to draw the current step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepView {
    pub participant_id: ParticipantId,
    pub status: SessionStatus,
    pub stage: Option<String>,
    pub iteration: Option<u32>,
    pub step: Option<String>,
    pub rule: Option<StepRule>,
    /// Definitions of the visible fields, in declaration order.
    pub fields: Vec<FieldDefinition>,
    pub drafts: BTreeMap<String, FieldValue>,
    /// Steps completed so far on the current path.
    pub steps_completed: usize,
    pub total_steps: usize,
}

/// Time a participant spent on one committed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTiming {
    pub stage: String,
    pub iteration: u32,
    pub step: String,
    pub entered_at_ms: u64,
    pub completed_at_ms: u64,
}

impl StepTiming {
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        self.completed_at_ms.saturating_sub(self.entered_at_ms)
    }
}

// =============================================================================
// SKIP CONTEXT
// =============================================================================

/// Borrowed view of the state skip predicates are evaluated against.
struct StateView<'a> {
    latest: &'a BTreeMap<String, BTreeMap<String, FieldValue>>,
    flags: &'a BTreeMap<String, FieldValue>,
}

impl SkipContext for StateView<'_> {
    fn resolve(&self, operand: &Operand) -> Option<&FieldValue> {
        match operand {
            Operand::Field { step, field } => self.latest.get(step).and_then(|s| s.get(field)),
            Operand::Flag(name) => self.flags.get(name),
        }
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// Per-participant progression state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantSession {
    participant_id: ParticipantId,
    cursor: SessionCursor,
    /// In-progress values of the current step, keyed by field id.
    drafts: BTreeMap<String, FieldValue>,
    /// Committed answers per visited position.
    committed: BTreeMap<Position, BTreeMap<String, FieldValue>>,
    /// Most recent committed answers per step name (any iteration).
    latest: BTreeMap<String, BTreeMap<String, FieldValue>>,
    flags: BTreeMap<String, FieldValue>,
    connected: bool,
    waiting: Option<BarrierKey>,
    /// When the current position was entered (ms since the Unix epoch).
    entered_at_ms: u64,
    timings: BTreeMap<Position, StepTiming>,
}

impl ParticipantSession {
    /// A fresh, connected, not yet started session.
    #[must_use]
    pub fn new(participant_id: ParticipantId) -> Self {
        Self {
            participant_id,
            cursor: SessionCursor::new(),
            drafts: BTreeMap::new(),
            committed: BTreeMap::new(),
            latest: BTreeMap::new(),
            flags: BTreeMap::new(),
            connected: true,
            waiting: None,
            entered_at_ms: 0,
            timings: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    #[must_use]
    pub fn cursor(&self) -> &SessionCursor {
        &self.cursor
    }

    #[must_use]
    pub fn position(&self) -> Option<Position> {
        self.cursor.position()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.cursor.is_complete()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The barrier slot the session is parked at, if any.
    #[must_use]
    pub fn waiting(&self) -> Option<BarrierKey> {
        self.waiting
    }

    #[must_use]
    pub fn drafts(&self) -> &BTreeMap<String, FieldValue> {
        &self.drafts
    }

    /// A draft value of the current step.
    #[must_use]
    pub fn draft(&self, field_id: &str) -> Option<&FieldValue> {
        self.drafts.get(field_id)
    }

    #[must_use]
    pub fn flags(&self) -> &BTreeMap<String, FieldValue> {
        &self.flags
    }

    #[must_use]
    pub fn entered_at_ms(&self) -> u64 {
        self.entered_at_ms
    }

    /// Timings of the committed steps, in path order.
    pub fn timings(&self) -> impl Iterator<Item = &StepTiming> {
        self.timings.values()
    }

    /// Answers committed at a position.
    #[must_use]
    pub fn committed_at(&self, position: Position) -> Option<&BTreeMap<String, FieldValue>> {
        self.committed.get(&position)
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        if !self.connected {
            return SessionStatus::Disconnected;
        }
        if self.waiting.is_some() {
            return SessionStatus::Waiting;
        }
        match self.cursor.state() {
            CursorState::NotStarted => SessionStatus::NotStarted,
            CursorState::InStep(_) => SessionStatus::InStep,
            CursorState::Complete => SessionStatus::Complete,
        }
    }

    /// Enter the first live step.
    pub fn start(&mut self, registry: &DefinitionRegistry) -> Result<CursorState, SurveyError> {
        let ctx = StateView {
            latest: &self.latest,
            flags: &self.flags,
        };
        let state = self.cursor.start(registry, &ctx)?;
        self.entered_at_ms = now_ms();
        self.load_drafts();
        Ok(state)
    }

    /// The step on screen.
    #[must_use]
    pub fn current_step<'a>(&self, registry: &'a DefinitionRegistry) -> Option<&'a StepDefinition> {
        self.cursor.current_step(registry)
    }

    /// Set (or clear, with an empty value) a draft value of the current step.
    pub fn set_value(
        &mut self,
        registry: &DefinitionRegistry,
        field_id: &str,
        value: FieldValue,
    ) -> Result<(), SurveyError> {
        let position = self.ensure_active(registry)?;
        let step = registry
            .step_at(position)
            .ok_or_else(|| SurveyError::UnknownStep(format!("{:?}", position)))?;
        if step.get_field(field_id).is_none() {
            return Err(SurveyError::UnknownField {
                step: step.name.clone(),
                field_id: field_id.to_string(),
            });
        }
        check_size(field_id, &value)?;

        if value.is_empty() {
            self.drafts.remove(field_id);
        } else {
            self.drafts.insert(field_id.to_string(), value);
        }
        Ok(())
    }

    /// Fields of the current step visible given the drafts.
    #[must_use]
    pub fn visible_fields(&self, registry: &DefinitionRegistry) -> VisibleFields {
        self.current_step(registry)
            .map(|step| visible_fields(step, &self.drafts))
            .unwrap_or_default()
    }

    /// Validate the current step, record its answers and move on (or wait).
    ///
    /// Only visible, non-empty drafts are recorded. On a `SYNC` step the
    /// answers are committed on arrival and the cursor moves when the
    /// barrier releases.
    pub fn attempt_advance(
        &mut self,
        registry: &DefinitionRegistry,
        recorder: &mut ResponseRecorder,
        barrier: &SyncBarrier,
    ) -> Result<AdvanceOutcome, SurveyError> {
        self.attempt_advance_at(registry, recorder, barrier, now_ms())
    }

    /// [`attempt_advance`](Self::attempt_advance) with an explicit clock reading.
    pub fn attempt_advance_at(
        &mut self,
        registry: &DefinitionRegistry,
        recorder: &mut ResponseRecorder,
        barrier: &SyncBarrier,
        now: u64,
    ) -> Result<AdvanceOutcome, SurveyError> {
        let position = self.ensure_active(registry)?;
        let (Some(stage), Some(step)) = (registry.stage_at(position.stage), registry.step_at(position))
        else {
            return Err(SurveyError::UnknownStep(format!("{:?}", position)));
        };

        let visible = visible_fields(step, &self.drafts);
        is_step_complete(step, &self.drafts, &visible)?;

        let answers: BTreeMap<String, FieldValue> = visible
            .iter()
            .filter_map(|id| self.drafts.get(id).map(|v| (id.to_string(), v.clone())))
            .collect();

        // Fields answered on an earlier visit but not now.
        if let Some(previous) = self.committed.get(&position) {
            for field_id in previous.keys().filter(|id| !answers.contains_key(*id)) {
                let key = self.record_key(&stage.name, position.iteration, &step.name, field_id);
                recorder.remove(&key)?;
            }
        }

        for (field_id, value) in &answers {
            let key = self.record_key(&stage.name, position.iteration, &step.name, field_id);
            recorder.record_at(key, value.clone(), now)?;
        }

        let timing = StepTiming {
            stage: stage.name.clone(),
            iteration: position.iteration,
            step: step.name.clone(),
            entered_at_ms: self.entered_at_ms,
            completed_at_ms: now,
        };
        tracing::debug!(
            participant = %self.participant_id,
            stage = %stage.name,
            iteration = position.iteration,
            step = %step.name,
            answers = answers.len(),
            duration_ms = timing.duration_ms(),
            "step committed"
        );
        self.timings.insert(position, timing);
        self.committed.insert(position, answers);
        self.rebuild_derived(registry, position);
        self.prune_off_path(registry, recorder, position)?;

        match registry.rule_for(position) {
            StepRule::Solo => self.move_on(registry, now),
            StepRule::Sync => match barrier.arrive(position, &self.participant_id)? {
                BarrierStatus::Released => self.move_on(registry, now),
                BarrierStatus::Waiting { arrived, expected } => {
                    self.waiting = Some(position);
                    Ok(AdvanceOutcome::Waiting { arrived, expected })
                }
            },
        }
    }

    /// Move on if the barrier the session waits at has released.
    ///
    /// Disconnected sessions stay parked until they reconnect.
    pub fn poll_barrier(
        &mut self,
        registry: &DefinitionRegistry,
        barrier: &SyncBarrier,
    ) -> Result<Option<AdvanceOutcome>, SurveyError> {
        let Some(key) = self.waiting else {
            return Ok(None);
        };
        if !self.connected || !barrier.is_released(key)? {
            return Ok(None);
        }
        self.move_on(registry, now_ms()).map(Some)
    }

    /// Step back to the previously visited position, restoring its answers
    /// as drafts.
    pub fn rewind(&mut self, registry: &DefinitionRegistry) -> Result<Position, SurveyError> {
        self.ensure_active(registry)?;
        let previous = self.cursor.rewind()?;
        self.entered_at_ms = now_ms();
        self.load_drafts();
        Ok(previous)
    }

    /// Park the session.
    pub fn disconnect(&mut self) {
        self.connected = false;
    }

    /// Resume at the parked position.
    pub fn reconnect(&mut self) {
        self.connected = true;
    }

    /// Snapshot for the rendering layer.
    #[must_use]
    pub fn view(&self, registry: &DefinitionRegistry) -> StepView {
        let position = self.position();
        let step = self.current_step(registry);
        let visible = self.visible_fields(registry);

        StepView {
            participant_id: self.participant_id.clone(),
            status: self.status(),
            stage: position
                .and_then(|p| registry.stage_at(p.stage))
                .map(|s| s.name.clone()),
            iteration: position.map(|p| p.iteration),
            step: step.map(|s| s.name.clone()),
            rule: position.map(|p| registry.rule_for(p)),
            fields: step
                .map(|s| {
                    s.fields
                        .iter()
                        .filter(|f| visible.contains(&f.id))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default(),
            drafts: self.drafts.clone(),
            steps_completed: self.cursor.history().len(),
            total_steps: registry.total_steps(),
        }
    }

    fn move_on(&mut self, registry: &DefinitionRegistry, now: u64) -> Result<AdvanceOutcome, SurveyError> {
        let ctx = StateView {
            latest: &self.latest,
            flags: &self.flags,
        };
        let state = self.cursor.advance(registry, &ctx)?;
        self.waiting = None;
        self.entered_at_ms = now;
        self.load_drafts();

        Ok(match state {
            CursorState::InStep(position) => AdvanceOutcome::Advanced { position },
            CursorState::Complete => {
                tracing::info!(participant = %self.participant_id, "session complete");
                AdvanceOutcome::Complete
            }
            CursorState::NotStarted => return Err(SurveyError::NotStarted),
        })
    }

    /// Recompute `latest` and the flags from the answers committed up to
    /// and including `upto`.
    fn rebuild_derived(&mut self, registry: &DefinitionRegistry, upto: Position) {
        self.latest.clear();
        self.flags.clear();
        for (position, answers) in self.committed.range(..=upto) {
            let Some(step) = registry.step_at(*position) else {
                continue;
            };
            self.latest.insert(step.name.clone(), answers.clone());
            for field in &step.fields {
                let Some(flag) = &field.flag else {
                    continue;
                };
                match answers.get(&field.id) {
                    Some(value) => {
                        self.flags.insert(flag.clone(), value.clone());
                    }
                    None => {
                        self.flags.remove(flag);
                    }
                }
            }
        }
    }

    /// Forget positions after `from` that the path now skips.
    ///
    /// They were committed on an earlier path; positions at or past the next
    /// live step stay, as drafts for when the participant gets there.
    fn prune_off_path(
        &mut self,
        registry: &DefinitionRegistry,
        recorder: &mut ResponseRecorder,
        from: Position,
    ) -> Result<(), SurveyError> {
        let ctx = StateView {
            latest: &self.latest,
            flags: &self.flags,
        };
        let next = self.cursor.peek_advance(registry, &ctx)?.position();
        let stale: Vec<Position> = self
            .committed
            .range((Bound::Excluded(from), Bound::Unbounded))
            .map(|(p, _)| *p)
            .filter(|p| next.is_none_or(|n| *p < n))
            .collect();

        for position in stale {
            self.timings.remove(&position);
            let Some(answers) = self.committed.remove(&position) else {
                continue;
            };
            let (Some(stage), Some(step)) = (registry.stage_at(position.stage), registry.step_at(position))
            else {
                continue;
            };
            for field_id in answers.keys() {
                let key = self.record_key(&stage.name, position.iteration, &step.name, field_id);
                recorder.remove(&key)?;
            }
            tracing::debug!(
                participant = %self.participant_id,
                step = %step.name,
                iteration = position.iteration,
                "answers of skipped step dropped"
            );
        }
        Ok(())
    }

    fn record_key(&self, stage: &str, iteration: u32, step: &str, field_id: &str) -> RecordKey {
        RecordKey::new(self.participant_id.clone(), stage, iteration, step, field_id)
    }

    /// Drafts of a (re)visited position start from its committed answers.
    fn load_drafts(&mut self) {
        self.drafts = self
            .position()
            .and_then(|p| self.committed.get(&p).cloned())
            .unwrap_or_default();
    }

    fn ensure_active(&self, registry: &DefinitionRegistry) -> Result<Position, SurveyError> {
        if !self.connected {
            return Err(SurveyError::Disconnected(self.participant_id.clone()));
        }
        if let Some(key) = self.waiting {
            let name = registry
                .step_at(key)
                .map_or_else(|| format!("{:?}", key), |s| s.name.clone());
            return Err(SurveyError::WaitingAtBarrier(name));
        }
        match self.cursor.state() {
            CursorState::NotStarted => Err(SurveyError::NotStarted),
            CursorState::Complete => Err(SurveyError::AlreadyComplete),
            CursorState::InStep(position) => Ok(position),
        }
    }
}

fn check_size(field_id: &str, value: &FieldValue) -> Result<(), SurveyError> {
    let too_long = |s: &str| s.len() > MAX_VALUE_LENGTH;
    let oversized = match value {
        FieldValue::Single(s) => too_long(s),
        FieldValue::Multiple(items) => {
            items.len() > MAX_SELECTIONS || items.iter().any(|s| too_long(s.as_str()))
        }
    };
    if oversized {
        return Err(SurveyError::InvalidValue {
            field_id: field_id.to_string(),
            reason: format!(
                "value exceeds {} bytes or {} selections",
                MAX_VALUE_LENGTH, MAX_SELECTIONS
            ),
        });
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

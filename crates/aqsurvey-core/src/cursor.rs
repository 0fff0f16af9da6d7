//! # Session Cursor
//!
//! Per-participant position in the stage/step plan.
//!
//! ```text
//! NotStarted --start()--> InStep(stage, iteration, step) --advance()--> ... --> Complete
//! ```
//!
//! `start()` is the entry transition; every `advance()` counts one step
//! completion. Skip predicates are evaluated on entry: a skipped stage or step
//! is passed over until a live step or the terminal position is reached.
//! Positions strictly increase while settling, so the walk always terminates.

use crate::definition::{SkipContext, StepDefinition};
use crate::registry::DefinitionRegistry;
use crate::types::{Position, SurveyError};
use serde::{Deserialize, Serialize};

/// Where a cursor stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CursorState {
    #[default]
    NotStarted,
    InStep(Position),
    Complete,
}

impl CursorState {
    /// The active position, if in a step.
    #[must_use]
    pub fn position(&self) -> Option<Position> {
        match self {
            Self::InStep(position) => Some(*position),
            Self::NotStarted | Self::Complete => None,
        }
    }
}

/// A participant's cursor plus the positions visited before the current one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCursor {
    state: CursorState,
    history: Vec<Position>,
}

impl SessionCursor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a cursor from persisted parts.
    #[must_use]
    pub fn from_parts(state: CursorState, history: Vec<Position>) -> Self {
        Self { state, history }
    }

    #[must_use]
    pub fn state(&self) -> CursorState {
        self.state
    }

    #[must_use]
    pub fn position(&self) -> Option<Position> {
        self.state.position()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state == CursorState::Complete
    }

    /// Live positions visited before the current one, oldest first.
    #[must_use]
    pub fn history(&self) -> &[Position] {
        &self.history
    }

    /// Enter the first live step, or `Complete` if every step is skipped.
    ///
    /// Starting an already started cursor leaves it where it is.
    pub fn start(
        &mut self,
        registry: &DefinitionRegistry,
        ctx: &dyn SkipContext,
    ) -> Result<CursorState, SurveyError> {
        if self.state != CursorState::NotStarted {
            return Ok(self.state);
        }
        let first = if registry.stage_count() == 0 {
            None
        } else {
            Some(Position::new(0, 0, 0))
        };
        self.state = settle(registry, ctx, first);
        tracing::debug!(state = ?self.state, "cursor started");
        Ok(self.state)
    }

    /// Complete the current step and move to the next live one.
    pub fn advance(
        &mut self,
        registry: &DefinitionRegistry,
        ctx: &dyn SkipContext,
    ) -> Result<CursorState, SurveyError> {
        let next = self.peek_advance(registry, ctx)?;
        if let Some(current) = self.position() {
            self.history.push(current);
        }
        self.state = next;
        Ok(self.state)
    }

    /// Where `advance()` would land given `ctx`, without moving.
    pub fn peek_advance(
        &self,
        registry: &DefinitionRegistry,
        ctx: &dyn SkipContext,
    ) -> Result<CursorState, SurveyError> {
        match self.state {
            CursorState::NotStarted => Err(SurveyError::NotStarted),
            CursorState::Complete => Err(SurveyError::AlreadyComplete),
            CursorState::InStep(current) => Ok(settle(registry, ctx, next_position(registry, current))),
        }
    }

    /// Return to the previously visited live position.
    pub fn rewind(&mut self) -> Result<Position, SurveyError> {
        match self.state {
            CursorState::NotStarted => Err(SurveyError::NotStarted),
            CursorState::Complete => Err(SurveyError::AlreadyComplete),
            CursorState::InStep(_) => {
                let previous = self.history.pop().ok_or(SurveyError::NothingToRewind)?;
                self.state = CursorState::InStep(previous);
                Ok(previous)
            }
        }
    }

    /// The active step, or `None` when not in a step.
    #[must_use]
    pub fn current_step<'a>(&self, registry: &'a DefinitionRegistry) -> Option<&'a StepDefinition> {
        self.position().and_then(|p| registry.step_at(p))
    }
}

/// The position after `from` when nothing is skipped.
///
/// Order: next step of the iteration, then step 0 of the next iteration,
/// then step 0 of the next stage.
#[must_use]
pub fn next_position(registry: &DefinitionRegistry, from: Position) -> Option<Position> {
    let stage = registry.stage_at(from.stage)?;
    if from.step + 1 < stage.steps.len() {
        return Some(Position::new(from.stage, from.iteration, from.step + 1));
    }
    if from.iteration.saturating_add(1) < stage.repeat() {
        return Some(Position::new(from.stage, from.iteration + 1, 0));
    }
    if from.stage + 1 < registry.stage_count() {
        return Some(Position::new(from.stage + 1, 0, 0));
    }
    None
}

/// First position of the stage after `stage`.
fn next_stage(registry: &DefinitionRegistry, stage: usize) -> Option<Position> {
    (stage + 1 < registry.stage_count()).then(|| Position::new(stage + 1, 0, 0))
}

/// Walk forward from `candidate` past skipped stages and steps.
fn settle(
    registry: &DefinitionRegistry,
    ctx: &dyn SkipContext,
    mut candidate: Option<Position>,
) -> CursorState {
    while let Some(position) = candidate {
        let Some(stage) = registry.stage_at(position.stage) else {
            break;
        };

        let entering_stage = position.iteration == 0 && position.step == 0;
        if entering_stage
            && stage
                .options
                .skip_when
                .as_ref()
                .is_some_and(|p| p.evaluate(ctx))
        {
            tracing::trace!(stage = %stage.name, "stage skipped");
            candidate = next_stage(registry, position.stage);
            continue;
        }

        let Some(step) = stage.steps.get(position.step) else {
            break;
        };
        if step.skip_when.as_ref().is_some_and(|p| p.evaluate(ctx)) {
            tracing::trace!(step = %step.name, iteration = position.iteration, "step skipped");
            candidate = next_position(registry, position);
            continue;
        }

        return CursorState::InStep(position);
    }
    CursorState::Complete
}

// =============================================================================
// TESTS
// =============================================================================

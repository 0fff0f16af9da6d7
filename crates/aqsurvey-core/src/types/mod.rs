//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the progression engine:
//! - Participant identifiers (`ParticipantId`)
//! - Answer values (`FieldValue`)
//! - Step rules and required contracts (`StepRule`, `Required`)
//! - Cursor positions (`Position`)
//! - Error types (`SurveyError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Use integer arithmetic only (no floating-point)
//! - Implement `Ord` where they are used as keys in `BTreeMap`/`BTreeSet`

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

// =============================================================================
// PARTICIPANT IDENTIFIER
// =============================================================================

/// Stable identifier of a participant, supplied by the identity/transport layer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    /// Create a new participant id.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// FIELD VALUE
// =============================================================================

/// The answer a participant gave to one field.
///
/// Text inputs and single-choice tables produce `Single`; multi-select
/// choice tables produce `Multiple`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Single(String),
    Multiple(Vec<String>),
}

impl FieldValue {
    /// Create a single value.
    #[must_use]
    pub fn single(s: impl Into<String>) -> Self {
        Self::Single(s.into())
    }

    /// Create a multi-selection value.
    #[must_use]
    pub fn multiple<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Multiple(items.into_iter().map(Into::into).collect())
    }

    /// A value is empty when it carries no usable answer.
    ///
    /// Whitespace-only text counts as empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Single(s) => s.trim().is_empty(),
            Self::Multiple(items) => items.iter().all(|s| s.trim().is_empty()),
        }
    }

    /// Number of distinct non-empty selections carried by this value.
    ///
    /// Repeating a choice does not count it twice.
    #[must_use]
    pub fn selection_count(&self) -> usize {
        self.selections().collect::<BTreeSet<_>>().len()
    }

    /// Iterate the non-empty selections in order.
    pub fn selections(&self) -> impl Iterator<Item = &str> {
        let items: &[String] = match self {
            Self::Single(s) => std::slice::from_ref(s),
            Self::Multiple(items) => items,
        };
        items
            .iter()
            .map(String::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// Check whether `choice` is one of the selections.
    #[must_use]
    pub fn includes(&self, choice: &str) -> bool {
        self.selections().any(|s| s == choice)
    }

    /// Flatten the value to one cell of text (selections joined with `;`).
    #[must_use]
    pub fn to_cell(&self) -> String {
        match self {
            Self::Single(s) => s.clone(),
            Self::Multiple(_) => self.selections().collect::<Vec<_>>().join(";"),
        }
    }
}

// =============================================================================
// STEP RULE
// =============================================================================

/// Controls how a participant leaves a step.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepRule {
    /// The participant advances independently once the step validates.
    #[default]
    Solo,
    /// The participant waits until every expected participant has completed
    /// the step.
    Sync,
}

impl std::fmt::Display for StepRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Solo => f.write_str("SOLO"),
            Self::Sync => f.write_str("SYNC"),
        }
    }
}

// =============================================================================
// REQUIRED CONTRACT
// =============================================================================

/// Required contract of a field.
///
/// Deserializes from either a boolean (`required = true`) or a number
/// (`required = 2`, meaning exactly two selections).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Required {
    Flag(bool),
    Exactly(u32),
}

impl Default for Required {
    fn default() -> Self {
        Self::Flag(false)
    }
}

impl Required {
    /// Whether the field takes part in the completion check at all.
    #[must_use]
    pub fn is_required(&self) -> bool {
        match self {
            Self::Flag(flag) => *flag,
            Self::Exactly(_) => true,
        }
    }

    /// The exact selection count demanded, if any.
    #[must_use]
    pub fn exact_count(&self) -> Option<u32> {
        match self {
            Self::Flag(_) => None,
            Self::Exactly(n) => Some(*n),
        }
    }
}

// =============================================================================
// POSITION
// =============================================================================

/// A cursor position: stage index, iteration of a repeating stage, step index.
///
/// Ordering follows the order in which positions are visited.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Position {
    pub stage: usize,
    pub iteration: u32,
    pub step: usize,
}

impl Position {
    #[must_use]
    pub const fn new(stage: usize, iteration: u32, step: usize) -> Self {
        Self {
            stage,
            iteration,
            step,
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the progression engine.
///
/// - Registry construction errors (`DuplicateName`, `UnknownReference`,
///   `InvalidDefinition`) abort startup.
/// - Validation errors (`MissingField`, `InvalidValue`) are recoverable and
///   meant to be shown to the participant.
/// - The engine never panics; all errors are returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SurveyError {
    /// A stage, step or field name collides with an earlier one.
    #[error("Duplicate name: {0}")]
    DuplicateName(String),

    /// A reveal rule or skip predicate names a step, field or flag that does not exist.
    #[error("Unknown reference: {0}")]
    UnknownReference(String),

    /// A definition is structurally invalid (zero repeat, empty choice list...).
    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    /// `advance()` was called on a completed session.
    #[error("Session already complete")]
    AlreadyComplete,

    /// The session has not been started yet.
    #[error("Session not started")]
    NotStarted,

    /// A visible required field has no (or not enough) value.
    #[error("Missing required field: {field_id}")]
    MissingField { field_id: String },

    /// A visible field carries a value its kind does not accept.
    #[error("Invalid value for field {field_id}: {reason}")]
    InvalidValue { field_id: String, reason: String },

    /// No session exists for this participant.
    #[error("Unknown participant: {0}")]
    UnknownParticipant(ParticipantId),

    /// The field does not belong to the current step.
    #[error("Unknown field '{field_id}' in step '{step}'")]
    UnknownField { step: String, field_id: String },

    /// No stage or step with this name.
    #[error("Unknown stage or step: {0}")]
    UnknownStep(String),

    /// `rewind()` at the first visited step.
    #[error("Nothing to rewind")]
    NothingToRewind,

    /// The session is parked at a SYNC barrier and cannot change its answers.
    #[error("Waiting at barrier for step '{0}'")]
    WaitingAtBarrier(String),

    /// The participant is disconnected; the session is parked.
    #[error("Participant disconnected: {0}")]
    Disconnected(ParticipantId),

    /// A lock guarding shared state was poisoned.
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl SurveyError {
    /// Whether the error is a validation failure the participant can fix.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::MissingField { .. } | Self::InvalidValue { .. })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_value_is_empty() {
        assert!(FieldValue::single("   ").is_empty());
        assert!(FieldValue::multiple(Vec::<String>::new()).is_empty());
        assert!(!FieldValue::single("Kerala").is_empty());
    }

    #[test]
    fn selection_count_ignores_blanks() {
        let value = FieldValue::multiple(["Poverty", "", "Corruption"]);
        assert_eq!(value.selection_count(), 2);
        assert!(value.includes("Corruption"));
        assert!(!value.includes(""));
        assert_eq!(value.to_cell(), "Poverty;Corruption");
    }

    #[test]
    fn repeated_choice_counts_once() {
        let value = FieldValue::multiple(["Poverty", "Poverty"]);
        assert_eq!(value.selection_count(), 1);
        assert_eq!(FieldValue::multiple(["a", "b", "a"]).selection_count(), 2);
    }

    #[test]
    fn required_from_bool_or_number() {
        let flag: Required = serde_json::from_str("true").expect("bool");
        assert_eq!(flag, Required::Flag(true));
        assert!(flag.is_required());

        let count: Required = serde_json::from_str("2").expect("number");
        assert_eq!(count.exact_count(), Some(2));
        assert!(!Required::default().is_required());
    }

    #[test]
    fn step_rule_wire_names() {
        assert_eq!(
            serde_json::to_string(&StepRule::Sync).expect("ser"),
            "\"SYNC\""
        );
        assert_eq!(StepRule::default(), StepRule::Solo);
    }

    #[test]
    fn position_orders_by_visit() {
        assert!(Position::new(0, 1, 0) > Position::new(0, 0, 5));
        assert!(Position::new(1, 0, 0) > Position::new(0, 9, 9));
    }

    #[test]
    fn validation_errors_are_recoverable() {
        let missing = SurveyError::MissingField {
            field_id: "q5_1".to_string(),
        };
        assert!(missing.is_recoverable());
        assert!(!SurveyError::AlreadyComplete.is_recoverable());
    }
}

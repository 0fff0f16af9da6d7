//! # API Request/Response Types
//!
//! JSON bodies of the participant API. Views and outcomes are the core's own
//! serializable types; this module only adds the request shapes and the
//! envelopes around them.

use aqsurvey_core::{
    AdvanceOutcome, BonusAmount, FieldValue, LongRow, ParticipantId, Position, StepView,
    primitives::MAX_NAME_LENGTH,
};
use serde::{Deserialize, Serialize};

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// ENROLL REQUEST
// =============================================================================

/// `POST /participants` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollRequest {
    pub participant_id: String,
}

impl EnrollRequest {
    /// Validate the id supplied by the identity layer.
    ///
    /// Ids are trimmed, must be non-empty, at most `MAX_NAME_LENGTH` bytes
    /// and free of `/` so they stay addressable as a path segment.
    pub fn to_participant(&self) -> Result<ParticipantId, String> {
        let id = self.participant_id.trim();
        if id.is_empty() {
            return Err("participant_id cannot be empty".to_string());
        }
        if id.len() > MAX_NAME_LENGTH {
            return Err(format!(
                "participant_id exceeds maximum length of {} bytes",
                MAX_NAME_LENGTH
            ));
        }
        if id.contains('/') || id.chars().any(char::is_control) {
            return Err("participant_id contains invalid characters".to_string());
        }
        Ok(ParticipantId::new(id))
    }
}

// =============================================================================
// VALUE REQUEST
// =============================================================================

/// A field value as the browser sends it: a string for text inputs and
/// single choices, a list for multi-select tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueInput {
    One(String),
    Many(Vec<String>),
}

impl From<ValueInput> for FieldValue {
    fn from(input: ValueInput) -> Self {
        match input {
            ValueInput::One(s) => FieldValue::Single(s),
            ValueInput::Many(items) => FieldValue::Multiple(items),
        }
    }
}

/// `POST /participants/{id}/values` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetValueRequest {
    pub field_id: String,
    pub value: ValueInput,
}

// =============================================================================
// ADVANCE / REWIND RESPONSES
// =============================================================================

/// `POST /participants/{id}/advance` response: the outcome plus the step
/// now on screen.
#[derive(Debug, Clone, Serialize)]
pub struct AdvanceResponse {
    #[serde(flatten)]
    pub outcome: AdvanceOutcome,
    pub view: StepView,
}

#[derive(Debug, Clone, Serialize)]
pub struct RewindResponse {
    pub position: Position,
    pub view: StepView,
}

// =============================================================================
// RECORDS / BONUS RESPONSES
// =============================================================================

/// A participant's committed answers in first-write order.
#[derive(Debug, Clone, Serialize)]
pub struct RecordsResponse {
    pub participant_id: String,
    pub count: usize,
    pub records: Vec<LongRow>,
}

impl RecordsResponse {
    pub fn new(participant: &ParticipantId, records: Vec<LongRow>) -> Self {
        Self {
            participant_id: participant.to_string(),
            count: records.len(),
            records,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BonusResponse {
    pub participant_id: String,
    pub cents: u64,
    /// `cents` as `units.cc`.
    pub amount: String,
    pub steps_answered: usize,
    pub complete: bool,
}

impl From<BonusAmount> for BonusResponse {
    fn from(bonus: BonusAmount) -> Self {
        Self {
            amount: bonus.formatted(),
            participant_id: bonus.participant_id.to_string(),
            cents: bonus.cents,
            steps_answered: bonus.steps_answered,
            complete: bonus.complete,
        }
    }
}

// =============================================================================
// ERROR RESPONSE
// =============================================================================

/// Body of every non-2xx JSON response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable code such as `missing_field`.
    pub error: String,
    pub message: String,
    /// The offending field for validation failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_id: Option<String>,
}

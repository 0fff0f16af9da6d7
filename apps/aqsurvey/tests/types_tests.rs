//! Unit tests for API types serialization/deserialization.

#![allow(clippy::unwrap_used, clippy::panic)]

use aqsurvey::api::{
    AdvanceResponse, BonusResponse, EnrollRequest, ErrorResponse, HealthResponse, SetValueRequest,
    ValueInput,
};
use aqsurvey_core::{
    AdvanceOutcome, BonusAmount, FieldValue, ParticipantId, Position, SessionStatus, StepView,
};
use std::collections::BTreeMap;

// =============================================================================
// HEALTH RESPONSE TESTS
// =============================================================================

#[test]
fn test_health_response_default() {
    let health = HealthResponse::default();
    assert_eq!(health.status, "ok");
    assert!(!health.version.is_empty());
}

#[test]
fn test_health_response_roundtrip() {
    let json = r#"{"status":"ok","version":"1.2.3"}"#;
    let health: HealthResponse = serde_json::from_str(json).unwrap();
    assert_eq!(health.version, "1.2.3");
    assert_eq!(serde_json::to_string(&health).unwrap(), json);
}

// =============================================================================
// ENROLL REQUEST TESTS
// =============================================================================

#[test]
fn test_enroll_trims_id() {
    let request: EnrollRequest = serde_json::from_str(r#"{"participant_id":"  p1 "}"#).unwrap();
    assert_eq!(request.to_participant().unwrap(), ParticipantId::new("p1"));
}

#[test]
fn test_enroll_rejects_bad_ids() {
    for bad in ["", "   ", "a/b", "tab\there"] {
        let request = EnrollRequest {
            participant_id: bad.to_string(),
        };
        assert!(request.to_participant().is_err(), "accepted {:?}", bad);
    }

    let long = EnrollRequest {
        participant_id: "x".repeat(10_000),
    };
    assert!(long.to_participant().is_err());
}

// =============================================================================
// VALUE REQUEST TESTS
// =============================================================================

#[test]
fn test_value_input_string_is_single() {
    let request: SetValueRequest =
        serde_json::from_str(r#"{"field_id":"State","value":"Kerala"}"#).unwrap();
    assert_eq!(request.value, ValueInput::One("Kerala".to_string()));
    assert_eq!(FieldValue::from(request.value), FieldValue::single("Kerala"));
}

#[test]
fn test_value_input_list_is_multiple() {
    let request: SetValueRequest =
        serde_json::from_str(r#"{"field_id":"q4_1","value":["Poverty","Corruption"]}"#).unwrap();
    assert_eq!(
        FieldValue::from(request.value),
        FieldValue::multiple(["Poverty", "Corruption"])
    );
}

#[test]
fn test_value_input_rejects_numbers() {
    let result: Result<SetValueRequest, _> =
        serde_json::from_str(r#"{"field_id":"guess_value","value":42}"#);
    assert!(result.is_err());
}

// =============================================================================
// RESPONSE TESTS
// =============================================================================

fn view() -> StepView {
    StepView {
        participant_id: ParticipantId::new("p1"),
        status: SessionStatus::InStep,
        stage: Some("survey".to_string()),
        iteration: Some(0),
        step: Some("q4".to_string()),
        rule: None,
        fields: vec![],
        drafts: BTreeMap::new(),
        steps_completed: 1,
        total_steps: 5,
    }
}

#[test]
fn test_advance_response_flattens_outcome() {
    let response = AdvanceResponse {
        outcome: AdvanceOutcome::Advanced {
            position: Position::new(0, 0, 1),
        },
        view: view(),
    };
    let value = serde_json::to_value(&response).unwrap();
    assert_eq!(value["outcome"], "advanced");
    assert_eq!(value["position"]["step"], 1);
    assert_eq!(value["view"]["step"], "q4");
}

#[test]
fn test_waiting_response_carries_counts() {
    let response = AdvanceResponse {
        outcome: AdvanceOutcome::Waiting {
            arrived: 2,
            expected: 4,
        },
        view: view(),
    };
    let value = serde_json::to_value(&response).unwrap();
    assert_eq!(value["outcome"], "waiting");
    assert_eq!(value["arrived"], 2);
    assert_eq!(value["expected"], 4);
}

#[test]
fn test_bonus_response_formats_amount() {
    let bonus = BonusResponse::from(BonusAmount {
        participant_id: ParticipantId::new("p1"),
        cents: 1205,
        steps_answered: 7,
        complete: true,
    });
    assert_eq!(bonus.amount, "12.05");
    assert_eq!(bonus.participant_id, "p1");
}

#[test]
fn test_error_response_omits_empty_field() {
    let error = ErrorResponse {
        error: "unknown_participant".to_string(),
        message: "Unknown participant: ghost".to_string(),
        field_id: None,
    };
    let json = serde_json::to_string(&error).unwrap();
    assert!(!json.contains("field_id"));

    let parsed: ErrorResponse = serde_json::from_str(&json).unwrap();
    assert!(parsed.field_id.is_none());
}

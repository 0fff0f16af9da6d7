//! # API Endpoint Handlers
//!
//! Thin adapters between JSON bodies and [`Experiment`] calls. Reads take the
//! shared lock; anything that changes a session takes the exclusive one.
//!
//! [`Experiment`]: aqsurvey_core::Experiment

use super::{
    AppState,
    error::ApiError,
    types::{
        AdvanceResponse, BonusResponse, EnrollRequest, HealthResponse, RecordsResponse,
        RewindResponse, SetValueRequest,
    },
};
use aqsurvey_core::{ExperimentStatus, FieldValue, ParticipantId, StepView, long_rows};
use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};

// =============================================================================
// HEALTH / STATUS
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

/// Experiment-wide counters.
pub async fn status_handler(
    State(state): State<AppState>,
) -> Result<Json<ExperimentStatus>, ApiError> {
    let experiment = state.experiment.read().await;
    Ok(Json(experiment.status()?))
}

// =============================================================================
// SESSION LIFECYCLE
// =============================================================================

/// Enroll a participant; an id seen before resumes its session.
pub async fn enroll_handler(
    State(state): State<AppState>,
    Json(request): Json<EnrollRequest>,
) -> Result<Json<StepView>, ApiError> {
    let participant = request.to_participant().map_err(ApiError::BadRequest)?;
    let mut experiment = state.experiment.write().await;
    Ok(Json(experiment.enroll(participant)?))
}

pub async fn view_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StepView>, ApiError> {
    let experiment = state.experiment.read().await;
    Ok(Json(experiment.view(&ParticipantId::new(id))?))
}

pub async fn disconnect_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StepView>, ApiError> {
    let mut experiment = state.experiment.write().await;
    Ok(Json(experiment.disconnect(&ParticipantId::new(id))?))
}

pub async fn reconnect_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StepView>, ApiError> {
    let mut experiment = state.experiment.write().await;
    Ok(Json(experiment.reconnect(&ParticipantId::new(id))?))
}

// =============================================================================
// ANSWERS & NAVIGATION
// =============================================================================

/// Store a draft value. The returned view reflects any reveal it caused.
pub async fn set_value_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SetValueRequest>,
) -> Result<Json<StepView>, ApiError> {
    let participant = ParticipantId::new(id);
    let value = FieldValue::from(request.value);
    let mut experiment = state.experiment.write().await;
    Ok(Json(experiment.set_value(
        &participant,
        &request.field_id,
        value,
    )?))
}

/// Validate and leave the current step.
///
/// Validation failures come back as 422 with the offending `field_id`; the
/// session stays where it was.
pub async fn advance_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AdvanceResponse>, ApiError> {
    let participant = ParticipantId::new(id);
    let mut experiment = state.experiment.write().await;
    let outcome = experiment.attempt_advance(&participant)?;
    tracing::debug!(participant = %participant, ?outcome, "advance");
    let view = experiment.view(&participant)?;
    Ok(Json(AdvanceResponse { outcome, view }))
}

pub async fn rewind_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RewindResponse>, ApiError> {
    let participant = ParticipantId::new(id);
    let mut experiment = state.experiment.write().await;
    let position = experiment.rewind(&participant)?;
    let view = experiment.view(&participant)?;
    Ok(Json(RewindResponse { position, view }))
}

// =============================================================================
// CONSUMERS
// =============================================================================

pub async fn records_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RecordsResponse>, ApiError> {
    let participant = ParticipantId::new(id);
    let experiment = state.experiment.read().await;
    let records = experiment.export_for(&participant)?;
    Ok(Json(RecordsResponse::new(&participant, long_rows(&records))))
}

pub async fn bonus_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BonusResponse>, ApiError> {
    let experiment = state.experiment.read().await;
    let bonus = experiment.bonus_for(&ParticipantId::new(id), &state.bonus)?;
    Ok(Json(BonusResponse::from(bonus)))
}

//! # API Errors
//!
//! Maps engine errors onto HTTP status codes:
//!
//! | Error | Status |
//! |---|---|
//! | `MissingField`, `InvalidValue` | 422 |
//! | `UnknownParticipant` | 404 |
//! | `UnknownField`, malformed requests | 400 |
//! | `AlreadyComplete`, `NotStarted`, `NothingToRewind`, `WaitingAtBarrier`, `Disconnected` | 409 |
//! | storage, lock and definition failures | 500 |

use super::types::ErrorResponse;
use aqsurvey_core::SurveyError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

#[derive(Debug)]
pub enum ApiError {
    /// The request itself is malformed.
    BadRequest(String),
    /// An error returned by the experiment.
    Survey(SurveyError),
}

impl From<SurveyError> for ApiError {
    fn from(err: SurveyError) -> Self {
        Self::Survey(err)
    }
}

impl ApiError {
    /// Status code, machine-readable code and offending field.
    fn classify(&self) -> (StatusCode, &'static str, Option<String>) {
        let err = match self {
            Self::BadRequest(_) => return (StatusCode::BAD_REQUEST, "bad_request", None),
            Self::Survey(err) => err,
        };

        match err {
            SurveyError::MissingField { field_id } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "missing_field",
                Some(field_id.clone()),
            ),
            SurveyError::InvalidValue { field_id, .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_value",
                Some(field_id.clone()),
            ),
            SurveyError::UnknownParticipant(_) => {
                (StatusCode::NOT_FOUND, "unknown_participant", None)
            }
            SurveyError::UnknownField { field_id, .. } => (
                StatusCode::BAD_REQUEST,
                "unknown_field",
                Some(field_id.clone()),
            ),
            SurveyError::AlreadyComplete => (StatusCode::CONFLICT, "already_complete", None),
            SurveyError::NotStarted => (StatusCode::CONFLICT, "not_started", None),
            SurveyError::NothingToRewind => (StatusCode::CONFLICT, "nothing_to_rewind", None),
            SurveyError::WaitingAtBarrier(_) => {
                (StatusCode::CONFLICT, "waiting_at_barrier", None)
            }
            SurveyError::Disconnected(_) => (StatusCode::CONFLICT, "disconnected", None),
            SurveyError::DuplicateName(_)
            | SurveyError::UnknownReference(_)
            | SurveyError::InvalidDefinition(_)
            | SurveyError::UnknownStep(_)
            | SurveyError::LockPoisoned(_)
            | SurveyError::SerializationError(_)
            | SurveyError::IoError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, field_id) = self.classify();
        let message = match self {
            Self::BadRequest(msg) => msg,
            Self::Survey(err) => err.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(error = %message, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), code, "request rejected");
        }

        (
            status,
            Json(ErrorResponse {
                error: code.to_string(),
                message,
                field_id,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aqsurvey_core::ParticipantId;

    fn status_of(err: SurveyError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn validation_errors_are_unprocessable() {
        assert_eq!(
            status_of(SurveyError::MissingField {
                field_id: "State".into()
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(SurveyError::InvalidValue {
                field_id: "guess_value".into(),
                reason: "above maximum 100".into()
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn state_conflicts_are_409() {
        assert_eq!(status_of(SurveyError::AlreadyComplete), StatusCode::CONFLICT);
        assert_eq!(
            status_of(SurveyError::WaitingAtBarrier("feedback".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(SurveyError::Disconnected(ParticipantId::new("p1"))),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn unknown_participant_is_404() {
        assert_eq!(
            status_of(SurveyError::UnknownParticipant(ParticipantId::new("ghost"))),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn storage_failure_is_500() {
        assert_eq!(
            status_of(SurveyError::IoError("disk full".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

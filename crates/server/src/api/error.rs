//! Error responses shared by the API handlers.
//!
//! Every failure is returned as `{"error": "..."}`. Bad input maps to 400,
//! missing records to 404, business-rule conflicts to 409 and everything
//! else to 500.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use novels_core::{
    ImportRunError, LedgerError, OrchestratorError, SchedulerError, VotingError,
};

/// Error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// An error ready to be sent to the client.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, error = %self.message, "Request failed");
        }
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientBalance { .. } => Self::conflict(e.to_string()),
            LedgerError::InvalidAmount(_) => Self::bad_request(e.to_string()),
            LedgerError::GrantRunNotFound(_) => Self::not_found(e.to_string()),
            LedgerError::Database(_) => Self::internal(e.to_string()),
        }
    }
}

impl From<VotingError> for ApiError {
    fn from(e: VotingError) -> Self {
        if e.is_conflict() {
            return Self::conflict(e.to_string());
        }
        match e {
            VotingError::Ledger(inner) => inner.into(),
            VotingError::InvalidAmount(_) | VotingError::InvalidId { .. } => {
                Self::bad_request(e.to_string())
            }
            VotingError::TargetNotFound(_) | VotingError::ProposalNotFound(_) => {
                Self::not_found(e.to_string())
            }
            _ => Self::internal(e.to_string()),
        }
    }
}

impl From<ImportRunError> for ApiError {
    fn from(e: ImportRunError) -> Self {
        match e {
            ImportRunError::NotFound(_) => Self::not_found(e.to_string()),
            ImportRunError::InvalidTransition { .. } | ImportRunError::OpenRunExists(_) => {
                Self::conflict(e.to_string())
            }
            ImportRunError::Database(_) => Self::internal(e.to_string()),
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        if e.is_not_found() {
            return Self::not_found(e.to_string());
        }
        if e.is_conflict() {
            return Self::conflict(e.to_string());
        }
        match e {
            OrchestratorError::NoImporter(_) => Self::bad_request(e.to_string()),
            OrchestratorError::Voting(inner) => inner.into(),
            _ => Self::internal(e.to_string()),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::UnknownJob(_) => Self::not_found(e.to_string()),
            SchedulerError::Ledger(inner) => inner.into(),
            SchedulerError::Voting(inner) => inner.into(),
            SchedulerError::Database(_) => Self::internal(e.to_string()),
        }
    }
}

/// Unwrap a JSON body, turning axum's plain-text rejection into an error body.
pub fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| ApiError::bad_request(format!("invalid request body: {}", e.body_text())))
}

/// Reject path ids that are not UUIDs before they reach a store.
pub fn require_uuid(what: &str, value: &str) -> Result<(), ApiError> {
    uuid::Uuid::parse_str(value)
        .map(|_| ())
        .map_err(|_| ApiError::bad_request(format!("invalid {} id", what)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use novels_core::{ImportRunStatus, TargetStatus};

    #[test]
    fn test_require_uuid() {
        assert!(require_uuid("run", "550e8400-e29b-41d4-a716-446655440000").is_ok());
        let err = require_uuid("run", "abc").unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "invalid run id");
    }

    #[test]
    fn test_ledger_errors() {
        let err: ApiError = LedgerError::InsufficientBalance { have: 1, need: 2 }.into();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.message, "insufficient balance: have 1, need 2");

        let err: ApiError = LedgerError::InvalidAmount(0).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_voting_errors_unwrap_ledger() {
        let err: ApiError =
            VotingError::Ledger(LedgerError::Database("locked".to_string())).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);

        let err: ApiError = VotingError::TargetNotInVotingStatus {
            target_id: "t".to_string(),
            status: TargetStatus::Cancelled,
        }
        .into();
        assert_eq!(err.status, StatusCode::CONFLICT);

        let err: ApiError = VotingError::ProposalNotFound("p".to_string()).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_orchestrator_errors() {
        let err: ApiError = OrchestratorError::NotPaused {
            run_id: "r".to_string(),
            status: ImportRunStatus::Running,
        }
        .into();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.message, "run is not paused");

        let err: ApiError = OrchestratorError::RunNotFound("r".to_string()).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err: ApiError = OrchestratorError::NoImporter("ftp://x".to_string()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_unknown_job_is_not_found() {
        let err: ApiError = SchedulerError::UnknownJob("nightly".to_string()).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}

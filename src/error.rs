//! Engine error kinds and their HTTP mapping.
//!
//! Transition and authoring errors are fatal to the single operation that
//! raised them. Bulk operations (badge sweeps, regenerate-all) catch them per
//! item and carry on.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::domain::{EntityRef, SubmissionState};

#[derive(Debug, Error)]
pub enum EngineError {
    /// A relation names an entity that cannot take part in it.
    #[error("Prerequisite authoring error: {0}")]
    PrereqAuthoring(String),

    #[error("Cannot {action} a submission that is {from:?}")]
    StateTransition {
        action: &'static str,
        from: SubmissionState,
    },

    #[error("Quest {0} is not available to this user")]
    UnavailableQuest(u64),

    #[error("Duplicate ordinal {ordinal} for user {user_id} on quest {quest_id}")]
    DuplicateOrdinal {
        user_id: u64,
        quest_id: u64,
        ordinal: u32,
    },

    #[error("Map {map_id} seed {seed} no longer exists")]
    MissingSeed { map_id: u64, seed: EntityRef },

    /// Internal only. Read paths convert it into a synchronous compute.
    #[error("Availability cache miss for user {0}")]
    CacheMiss(u64),

    #[error("Import validation failed: {0}")]
    ImportValidation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Task queue unavailable: {0}")]
    Queue(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        EngineError::NotFound(what.to_string())
    }

    /// Stable machine-readable code used in HTTP bodies and task failure logs.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::PrereqAuthoring(_) => "prereq_authoring",
            EngineError::StateTransition { .. } => "state_transition",
            EngineError::UnavailableQuest(_) => "unavailable_quest",
            EngineError::DuplicateOrdinal { .. } => "duplicate_ordinal",
            EngineError::MissingSeed { .. } => "missing_seed",
            EngineError::CacheMiss(_) => "cache_miss",
            EngineError::ImportValidation(_) => "import_validation",
            EngineError::NotFound(_) => "not_found",
            EngineError::PermissionDenied(_) => "permission_denied",
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::Queue(_) => "queue",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            EngineError::NotFound(_) | EngineError::MissingSeed { .. } => StatusCode::NOT_FOUND,
            EngineError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            EngineError::StateTransition { .. }
            | EngineError::UnavailableQuest(_)
            | EngineError::DuplicateOrdinal { .. } => StatusCode::CONFLICT,
            EngineError::PrereqAuthoring(_) | EngineError::ImportValidation(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            EngineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            EngineError::CacheMiss(_) | EngineError::Queue(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(target: "bytedeck", code = self.code(), error = %self, "Request failed");
        } else {
            tracing::debug!(target: "bytedeck", code = self.code(), error = %self, "Request rejected");
        }
        let body = Json(json!({ "error": self.code(), "message": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_errors_map_to_conflict() {
        let err = EngineError::StateTransition { action: "approve", from: SubmissionState::InProgress };
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "state_transition");
        assert!(err.to_string().contains("approve"));
    }

    #[test]
    fn missing_things_are_not_found() {
        assert_eq!(EngineError::not_found("Quest 4").status(), StatusCode::NOT_FOUND);
        assert_eq!(EngineError::not_found("Quest 4").to_string(), "Quest 4 not found");
    }
}

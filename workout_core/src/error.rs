//! Error types for the workout_core library.

use crate::types::{ExerciseStatus, SessionStatus};
use std::io;
use uuid::Uuid;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Broad error categories used by callers to decide how to react
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caller mistake or stale client state; refetch and retry manually
    Validation,
    /// A referenced entity does not exist
    NotFound,
    /// Durable store trouble; recovered by the sync queue
    Persistence,
    /// Internal bookkeeping went out of sync
    Consistency,
    /// Configuration, parsing and everything else
    Internal,
}

/// Core error type for workout_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catalog validation error
    #[error("Catalog validation error: {0}")]
    CatalogValidation(String),

    #[error("Cannot {action} a session in state {from:?}")]
    InvalidTransition {
        from: SessionStatus,
        action: &'static str,
    },

    #[error("Exercise log {exercise_log_id} is still in progress")]
    ExerciseAlreadyActive { exercise_log_id: Uuid },

    #[error("Exercise at index {index} has already been logged")]
    ExerciseAlreadyLogged { index: usize },

    #[error("Exercise log {exercise_log_id} is closed ({status:?})")]
    ExerciseLogClosed {
        exercise_log_id: Uuid,
        status: ExerciseStatus,
    },

    #[error("Expected set number {expected}, got {got}")]
    SetSequenceError { expected: u32, got: u32 },

    #[error("All {target_sets} target sets are already logged")]
    SetLimitReached { target_sets: u32 },

    #[error("Invalid set data: {0}")]
    InvalidSetData(String),

    #[error("Session {session_id} is {status:?} and no longer accepts changes")]
    SessionTerminated {
        session_id: Uuid,
        status: SessionStatus,
    },

    #[error("User already has an active session {session_id}")]
    SessionAlreadyActive { session_id: Uuid },

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Workout '{workout_id}' has no exercise at index {index}")]
    ExerciseNotFound { workout_id: String, index: usize },

    #[error("Exercise log not found: {0}")]
    ExerciseLogNotFound(Uuid),

    #[error("Workout not found: {0}")]
    WorkoutNotFound(String),

    #[error("Session {0} has not been completed")]
    SessionNotCompleted(Uuid),

    /// The durable store could not be reached
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A queued write ran out of retries and needs acknowledgement
    #[error("Sync item {item_id} failed after {attempts} attempts: {last_error}")]
    SyncExhausted {
        item_id: Uuid,
        attempts: u32,
        last_error: String,
    },

    #[error("Consistency violation: {0}")]
    Consistency(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::InvalidTransition { .. }
            | Error::ExerciseAlreadyActive { .. }
            | Error::ExerciseAlreadyLogged { .. }
            | Error::ExerciseLogClosed { .. }
            | Error::SetSequenceError { .. }
            | Error::SetLimitReached { .. }
            | Error::InvalidSetData(_)
            | Error::SessionTerminated { .. }
            | Error::SessionAlreadyActive { .. }
            | Error::SessionNotCompleted(_) => ErrorClass::Validation,

            Error::SessionNotFound(_)
            | Error::ExerciseNotFound { .. }
            | Error::ExerciseLogNotFound(_)
            | Error::WorkoutNotFound(_) => ErrorClass::NotFound,

            Error::Io(_) | Error::StoreUnavailable(_) | Error::SyncExhausted { .. } => {
                ErrorClass::Persistence
            }

            Error::Consistency(_) => ErrorClass::Consistency,

            Error::Json(_)
            | Error::Csv(_)
            | Error::Toml(_)
            | Error::Config(_)
            | Error::CatalogValidation(_)
            | Error::Other(_) => ErrorClass::Internal,
        }
    }

    /// Whether the sync queue should try the failed write again.
    ///
    /// Exhausted items are persistence errors but are never retried
    /// automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Io(_) | Error::StoreUnavailable(_))
    }
}

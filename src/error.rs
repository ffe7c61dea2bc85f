//! Error types shared by the store, the session controller and the binary.

use thiserror::Error;

use crate::controller::SessionPhase;

/// A set-log field broke one of its rules.
///
/// Raised both when the form is submitted and again when the store receives
/// the set, so a bypassed form cannot write bad rows.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("exercise name must not be empty")]
    EmptyExerciseName,

    #[error("weight must be a finite number >= 0 (got {0})")]
    InvalidWeight(f64),

    #[error("reps must be at least 1 (got {0})")]
    RepsTooLow(u32),

    #[error("RPE must be between 0 and 10 (got {0})")]
    RpeOutOfRange(u8),

    #[error("set number must be at least 1 (got {0})")]
    SetNumberTooLow(u32),

    #[error("{field} is not a number: '{input}'")]
    NotANumber { field: &'static str, input: String },
}

/// Failures reported by a [`crate::store::WorkoutStore`].
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid set: {0}")]
    Validation(#[from] ValidationError),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} '{id}' does not belong to the current user")]
    Unauthorized { entity: &'static str, id: String },

    #[error("workout session is not in progress")]
    SessionNotInProgress,

    #[error("a workout is already in progress ({0})")]
    AlreadyInProgress(String),

    #[error("database error: {0}")]
    Database(#[source] rusqlite::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call timed out")]
    Timeout,
}

/// Rows that exist but cannot be decoded are `Corrupt`; everything else
/// SQLite reports stays a `Database` error.
impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::FromSqlConversionFailure(idx, _, cause) => {
                Self::Corrupt(format!("column {idx}: {cause}"))
            }
            rusqlite::Error::IntegralValueOutOfRange(idx, value) => {
                Self::Corrupt(format!("column {idx}: {value} out of range"))
            }
            other => Self::Database(other),
        }
    }
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn unauthorized(entity: &'static str, id: impl ToString) -> Self {
        Self::Unauthorized {
            entity,
            id: id.to_string(),
        }
    }

    /// Network-ish failures the user can simply retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::Timeout | Self::Database(_)
        )
    }

    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

/// Rejected controller actions. None of these change the phase.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControllerError {
    #[error("cannot {action} while {from}")]
    InvalidTransition {
        from: SessionPhase,
        action: &'static str,
    },

    #[error("waiting for the previous save to finish")]
    Pending,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("finish the current step before ending the workout (currently {0})")]
    FinishNotAllowed(SessionPhase),

    #[error("ending the workout needs confirmation first")]
    FinishNotConfirmed,

    #[error("workout already finished")]
    Finished,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(StoreError::Timeout.is_transient());
        assert!(StoreError::Unavailable("offline".into()).is_transient());
        assert!(!StoreError::unauthorized("set", "abc").is_transient());
        assert!(!StoreError::Validation(ValidationError::EmptyExerciseName).is_transient());
        assert!(!StoreError::Corrupt("column 3".into()).is_transient());
    }

    #[test]
    fn undecodable_columns_are_corrupt() {
        let err = StoreError::from(rusqlite::Error::IntegralValueOutOfRange(3, -1));
        assert_eq!(err.to_string(), "corrupt row: column 3: -1 out of range");

        let err = StoreError::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(err, StoreError::Database(_)));
    }

    #[test]
    fn authorization_classification() {
        assert!(StoreError::unauthorized("session", "x").is_authorization());
        assert!(!StoreError::not_found("session", "x").is_authorization());
    }

    #[test]
    fn messages_name_the_entity() {
        let err = StoreError::not_found("set", "42");
        assert_eq!(err.to_string(), "set '42' not found");

        let err = ControllerError::InvalidTransition {
            from: SessionPhase::Resting,
            action: "start a set",
        };
        assert_eq!(err.to_string(), "cannot start a set while resting");
    }
}

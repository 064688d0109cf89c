//! Error taxonomy for ledger operations
use crate::enrollment::EnrollmentStatus;

/// Errors surfaced to callers of [`crate::service::LmsService`].
///
/// Every business-rule variant aborts the whole operation; nothing is
/// partially written. Only `StoreUnavailable` is worth retrying.
#[derive(thiserror::Error, Debug)]
pub enum LmsError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("Access denied")]
    Forbidden,
    #[error("No identity was supplied for this request")]
    Unauthenticated,
    #[error("Invalid enrollment transition: {0}")]
    InvalidTransition(String),
    #[error("Learning record can only be changed on the day it was created")]
    StaleEditWindow,
    #[error("Learner is already enrolled in this course")]
    DuplicateEnrollment,
    #[error("Enrollment still has learning records")]
    HasDependentRecords,
    #[error("Session duration is invalid: {0}")]
    InvalidDuration(String),
    #[error("Invalid value for {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("Course is not active")]
    InactiveCourse,
    #[error("Enrollment has been cancelled")]
    CancelledEnrollment,
    #[error("User {0} is not a learner")]
    NotALearner(String),
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Failed to encode or decode a stored value: {0}")]
    Codec(String),
    #[error("Internal error: {0}")]
    Internal(String),
    /// A read or write inside a store transaction was interrupted by a
    /// concurrent writer. `Store::transact` turns this back into a retry.
    #[error("Store transaction interrupted: {0}")]
    Interrupted(sled::transaction::UnabortableTransactionError),
}

impl From<sled::Error> for LmsError {
    fn from(value: sled::Error) -> Self {
        LmsError::StoreUnavailable(value.to_string())
    }
}

impl From<sled::transaction::UnabortableTransactionError> for LmsError {
    fn from(value: sled::transaction::UnabortableTransactionError) -> Self {
        LmsError::Interrupted(value)
    }
}

impl From<minicbor::decode::Error> for LmsError {
    fn from(value: minicbor::decode::Error) -> Self {
        LmsError::Codec(value.to_string())
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for LmsError {
    fn from(value: minicbor::encode::Error<E>) -> Self {
        LmsError::Codec(value.to_string())
    }
}

/// Rejections produced by the enrollment state machine itself.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TransitionError {
    #[error("{from:?} -> {to:?} is not allowed")]
    InvalidTransition {
        from: EnrollmentStatus,
        to: EnrollmentStatus,
    },
    #[error("completion requires 100% progress, found {0}%")]
    IncompleteProgress(u8),
    #[error("{0:?} is terminal")]
    Terminal(EnrollmentStatus),
    #[error("enrollment has not been started")]
    NotStarted,
    #[error("acting learner does not own this enrollment")]
    NotOwner,
    #[error("only administrators may set {0}")]
    AdminOnly(&'static str),
    #[error("progress must be within 0..=100, found {0}")]
    ProgressOutOfRange(u8),
}

impl From<TransitionError> for LmsError {
    fn from(value: TransitionError) -> Self {
        match value {
            TransitionError::NotOwner | TransitionError::AdminOnly(_) => LmsError::Forbidden,
            TransitionError::ProgressOutOfRange(p) => LmsError::InvalidField {
                field: "progress_percentage",
                reason: format!("{p} is above 100"),
            },
            other => LmsError::InvalidTransition(other.to_string()),
        }
    }
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

pub type LmsResult<T> = Result<T, LmsError>;

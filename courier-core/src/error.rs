use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Faults that escape the dispatch engine to its caller.
///
/// Per-recipient delivery failures never show up here; they are recorded as
/// failed attempts instead.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid mailing state: {0}")]
    InvalidMailingState(String),

    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Scheduling window missed for mailing {0}")]
    WindowMissed(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Record not found")]
    NotFound,

    #[error("Constraint violation: {0}")]
    Constraint(String),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid email format: {0}")]
    InvalidEmail(String),

    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),
}

impl Error {
    /// Whether re-invoking the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Dispatch(DispatchError::TransportUnavailable(_))
                | Error::Storage(StorageError::Connection(_))
        )
    }

    pub fn is_validation_error(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    pub fn is_storage_error(&self) -> bool {
        matches!(self, Error::Storage(_))
    }

    pub fn is_dispatch_error(&self) -> bool {
        matches!(self, Error::Dispatch(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Storage(StorageError::NotFound))
    }
}

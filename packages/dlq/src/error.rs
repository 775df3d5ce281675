use common::InvalidEvent;
use sea_orm::DbErr;
use thiserror::Error;

/// Persistence failures. Always surfaced; a lost dead letter is lost data.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Value out of range for {field}: {value}")]
    OutOfRange { field: &'static str, value: i64 },
}

#[derive(Debug, Error)]
pub enum DlqError {
    #[error("Invalid dead letter event: {0}")]
    Invalid(#[from] InvalidEvent),

    #[error("Event belongs to service '{actual}' but this queue serves '{expected}'")]
    ServiceMismatch { expected: String, actual: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

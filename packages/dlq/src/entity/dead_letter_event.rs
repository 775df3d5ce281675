use common::DeadLetterEvent;
use sea_orm::Set;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Event that failed to publish, awaiting redelivery.
///
/// Keyed by `(id, service_name)`: services sharing the table never collide.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "dead_letter_event")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(primary_key, auto_increment = false)]
    pub service_name: String,

    pub event_type: String,

    pub payload: Vec<u8>,

    pub failed_at: DateTimeUtc,

    pub retry_count: i32,

    pub max_retries: i32,

    /// NULL means ready now.
    pub next_retry_at: Option<DateTimeUtc>,

    #[sea_orm(column_type = "Text")]
    pub last_error: String,
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn into_event(self) -> Result<DeadLetterEvent, StoreError> {
        Ok(DeadLetterEvent {
            id: self.id,
            retry_count: to_count("retry_count", self.retry_count)?,
            max_retries: to_count("max_retries", self.max_retries)?,
            service_name: self.service_name,
            event_type: self.event_type,
            payload: self.payload,
            failed_at: self.failed_at,
            next_retry_at: self.next_retry_at,
            last_error: self.last_error,
        })
    }
}

/// Build the row for a new record.
pub fn active_model(event: &DeadLetterEvent) -> Result<ActiveModel, StoreError> {
    Ok(ActiveModel {
        id: Set(event.id),
        service_name: Set(event.service_name.clone()),
        event_type: Set(event.event_type.clone()),
        payload: Set(event.payload.clone()),
        failed_at: Set(event.failed_at),
        retry_count: Set(to_column("retry_count", event.retry_count)?),
        max_retries: Set(to_column("max_retries", event.max_retries)?),
        next_retry_at: Set(event.next_retry_at),
        last_error: Set(event.last_error.clone()),
    })
}

fn to_count(field: &'static str, value: i32) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::OutOfRange {
        field,
        value: value.into(),
    })
}

fn to_column(field: &'static str, value: u32) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::OutOfRange {
        field,
        value: value.into(),
    })
}

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Retry ceiling applied when the publisher does not choose one.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Page size for the ready-for-retry query.
pub const DEFAULT_BATCH_SIZE: u64 = 100;

/// An event that failed to publish and is waiting for redelivery.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEvent {
    /// Assigned at creation; together with `service_name` it keys the record.
    pub id: Uuid,
    /// Owning service. Every store query is scoped to it.
    pub service_name: String,
    /// Routing key used on redelivery. Opaque here.
    pub event_type: String,
    /// Serialized event body. Never interpreted.
    pub payload: Vec<u8>,
    /// When the first publish attempt failed.
    pub failed_at: DateTime<Utc>,
    /// Redelivery attempts already made.
    pub retry_count: u32,
    /// Once `retry_count` reaches this, the event is exhausted.
    pub max_retries: u32,
    /// `None` means ready now.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Most recent failure reason.
    pub last_error: String,
}

impl DeadLetterEvent {
    /// Build a fresh record for an event that just failed to publish.
    pub fn new(
        service_name: impl Into<String>,
        event_type: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        last_error: impl Into<String>,
        failed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            service_name: service_name.into(),
            event_type: event_type.into(),
            payload: payload.into(),
            failed_at,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            next_retry_at: None,
            last_error: last_error.into(),
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Whether automatic retries are over for this record.
    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Whether the drain worker should pick this record up at `now`.
    pub fn is_ready_for_retry(&self, now: DateTime<Utc>) -> bool {
        !self.is_exhausted() && self.next_retry_at.is_none_or(|at| at <= now)
    }

    /// Check the fields an enqueue requires.
    pub fn validate(&self) -> Result<(), InvalidEvent> {
        if self.service_name.trim().is_empty() {
            return Err(InvalidEvent::EmptyServiceName);
        }
        if self.event_type.trim().is_empty() {
            return Err(InvalidEvent::EmptyEventType);
        }
        if self.payload.is_empty() {
            return Err(InvalidEvent::EmptyPayload);
        }
        Ok(())
    }
}

// Payloads stay out of logs; only their size is shown.
impl fmt::Debug for DeadLetterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadLetterEvent")
            .field("id", &self.id)
            .field("service_name", &self.service_name)
            .field("event_type", &self.event_type)
            .field("payload_len", &self.payload.len())
            .field("failed_at", &self.failed_at)
            .field("retry_count", &self.retry_count)
            .field("max_retries", &self.max_retries)
            .field("next_retry_at", &self.next_retry_at)
            .field("last_error", &self.last_error)
            .finish()
    }
}

/// Reasons an event is refused at enqueue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidEvent {
    #[error("service_name must not be empty")]
    EmptyServiceName,

    #[error("event_type must not be empty")]
    EmptyEventType,

    #[error("payload must not be empty")]
    EmptyPayload,
}

/// Result of an insert into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A record with the same id already existed; nothing was written.
    AlreadyPresent,
}

/// What happened to a dead-lettered event after a redelivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RetryOutcome {
    /// Published and removed from the store.
    Delivered,
    /// Failed again; will be picked up after `next_retry_at`.
    ScheduledForRetry {
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
    },
    /// Failed again and reached its retry ceiling.
    Exhausted { retry_count: u32 },
    /// No record with that id exists for this service.
    NotFound,
}

impl RetryOutcome {
    /// Classify a record's bookkeeping right after a failure was recorded.
    pub fn after_failure(
        retry_count: u32,
        max_retries: u32,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Self {
        match next_retry_at {
            Some(next_retry_at) if retry_count < max_retries => Self::ScheduledForRetry {
                retry_count,
                next_retry_at,
            },
            _ => Self::Exhausted { retry_count },
        }
    }
}

/// Dead letter counts for one service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlqStats {
    /// All records, exhausted ones included.
    pub total: u64,
    /// Records the drain worker would pick up right now.
    pub ready: u64,
    /// Records with `retry_count >= max_retries`.
    pub exhausted: u64,
}

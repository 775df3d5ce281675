use std::sync::Arc;

use common::dlq::DEFAULT_BATCH_SIZE;
use common::{Clock, DeadLetterEvent, DlqStats, InsertOutcome, InvalidEvent, RetryOutcome};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::DlqError;
use crate::store::DeadLetterStore;

/// Dead letter queue bound to one service.
///
/// Cheap to clone; clones share the store and clock.
#[derive(Clone)]
pub struct DeadLetterQueue {
    service_name: String,
    store: Arc<dyn DeadLetterStore>,
    clock: Arc<dyn Clock>,
    batch_size: u64,
}

impl DeadLetterQueue {
    pub fn new(
        service_name: impl Into<String>,
        store: Arc<dyn DeadLetterStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DlqError> {
        let service_name = service_name.into();
        if service_name.trim().is_empty() {
            return Err(InvalidEvent::EmptyServiceName.into());
        }

        Ok(Self {
            service_name,
            store,
            clock,
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    /// Page size for [`Self::get_events_ready_for_retry`]. Zero falls back to the default.
    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = if batch_size == 0 {
            DEFAULT_BATCH_SIZE
        } else {
            batch_size
        };
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Store an event that failed to publish. A repeated id is a no-op.
    pub async fn enqueue(&self, event: &DeadLetterEvent) -> Result<InsertOutcome, DlqError> {
        event.validate()?;
        if event.service_name != self.service_name {
            return Err(DlqError::ServiceMismatch {
                expected: self.service_name.clone(),
                actual: event.service_name.clone(),
            });
        }

        let outcome = self.store.insert(event).await?;
        match outcome {
            InsertOutcome::Inserted => warn!(
                service = %self.service_name,
                event_id = %event.id,
                event_type = %event.event_type,
                max_retries = event.max_retries,
                error = %event.last_error,
                "Event dead-lettered"
            ),
            InsertOutcome::AlreadyPresent => info!(
                service = %self.service_name,
                event_id = %event.id,
                "Event already dead-lettered, skipping"
            ),
        }
        Ok(outcome)
    }

    /// Build and enqueue a record for a publish that just failed.
    pub async fn dead_letter(
        &self,
        event_type: &str,
        payload: &[u8],
        error: &str,
        max_retries: u32,
    ) -> Result<DeadLetterEvent, DlqError> {
        let event = DeadLetterEvent::new(
            self.service_name.clone(),
            event_type,
            payload,
            error,
            self.clock.now(),
        )
        .with_max_retries(max_retries);

        self.enqueue(&event).await?;
        Ok(event)
    }

    /// The next page of events due for redelivery, oldest failure first.
    pub async fn get_events_ready_for_retry(&self) -> Result<Vec<DeadLetterEvent>, DlqError> {
        let events = self
            .store
            .select_ready_for_retry(&self.service_name, self.clock.now(), self.batch_size)
            .await?;
        Ok(events)
    }

    /// Drop an event after it was redelivered. Returns whether it existed.
    pub async fn remove(&self, event_id: Uuid) -> Result<bool, DlqError> {
        let removed = self.store.delete(event_id, &self.service_name).await?;
        if removed {
            info!(
                service = %self.service_name,
                event_id = %event_id,
                "Dead-lettered event removed"
            );
        }
        Ok(removed)
    }

    /// Record a failed redelivery and reschedule with backoff.
    pub async fn mark_as_failed(
        &self,
        event_id: Uuid,
        error: &str,
    ) -> Result<RetryOutcome, DlqError> {
        let outcome = self
            .store
            .record_failure(event_id, &self.service_name, error, self.clock.now())
            .await?;

        match outcome {
            RetryOutcome::ScheduledForRetry {
                retry_count,
                next_retry_at,
            } => warn!(
                service = %self.service_name,
                event_id = %event_id,
                retry_count,
                next_retry_at = %next_retry_at,
                error,
                "Redelivery failed, rescheduled"
            ),
            RetryOutcome::Exhausted { retry_count } => error!(
                service = %self.service_name,
                event_id = %event_id,
                retry_count,
                error,
                "Redelivery failed, retries exhausted"
            ),
            RetryOutcome::NotFound => warn!(
                service = %self.service_name,
                event_id = %event_id,
                "Cannot mark unknown event as failed"
            ),
            RetryOutcome::Delivered => {}
        }
        Ok(outcome)
    }

    pub async fn get_stats(&self) -> Result<DlqStats, DlqError> {
        Ok(self
            .store
            .stats(&self.service_name, self.clock.now())
            .await?)
    }

    pub async fn get_event(&self, event_id: Uuid) -> Result<Option<DeadLetterEvent>, DlqError> {
        Ok(self.store.get(event_id, &self.service_name).await?)
    }

    /// Events past their retry ceiling, for operators.
    pub async fn exhausted_events(&self) -> Result<Vec<DeadLetterEvent>, DlqError> {
        Ok(self
            .store
            .list_exhausted(&self.service_name, self.batch_size)
            .await?)
    }
}

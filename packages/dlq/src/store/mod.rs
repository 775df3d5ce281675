#[cfg(test)]
pub(crate) mod failing;
mod memory;
mod postgres;

pub use memory::MemoryDeadLetterStore;
pub use postgres::SeaOrmDeadLetterStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{DeadLetterEvent, DlqStats, InsertOutcome, RetryOutcome};
use uuid::Uuid;

use crate::error::StoreError;

/// Durable storage for dead-lettered events.
///
/// Every operation except `ensure_schema` and `insert` takes the owning
/// service name and never reads or writes another service's records.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Create backing storage if absent. Idempotent.
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    /// Insert a new record; a second insert of the same id is a no-op.
    async fn insert(&self, event: &DeadLetterEvent) -> Result<InsertOutcome, StoreError>;

    /// Up to `limit` records that are not exhausted and due at `now`,
    /// oldest failure first.
    async fn select_ready_for_retry(
        &self,
        service_name: &str,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<DeadLetterEvent>, StoreError>;

    async fn get(
        &self,
        id: Uuid,
        service_name: &str,
    ) -> Result<Option<DeadLetterEvent>, StoreError>;

    /// Physically remove a record. Returns whether one was removed.
    async fn delete(&self, id: Uuid, service_name: &str) -> Result<bool, StoreError>;

    /// Atomically bump `retry_count`, store `error`, and reschedule.
    ///
    /// `next_retry_at` becomes `now + backoff(old retry_count)`, or NULL once
    /// the new count reaches `max_retries`.
    async fn record_failure(
        &self,
        id: Uuid,
        service_name: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<RetryOutcome, StoreError>;

    async fn stats(&self, service_name: &str, now: DateTime<Utc>) -> Result<DlqStats, StoreError>;

    /// Exhausted records kept for operator inspection, oldest failure first.
    async fn list_exhausted(
        &self,
        service_name: &str,
        limit: u64,
    ) -> Result<Vec<DeadLetterEvent>, StoreError>;
}

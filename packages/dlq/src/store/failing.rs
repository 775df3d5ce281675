use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{DeadLetterEvent, DlqStats, InsertOutcome, RetryOutcome};
use sea_orm::DbErr;
use uuid::Uuid;

use super::{DeadLetterStore, MemoryDeadLetterStore};
use crate::error::StoreError;

/// Memory store whose writes can be switched to fail like a lost database.
#[derive(Default)]
pub(crate) struct FailingStore {
    pub inner: MemoryDeadLetterStore,
    fail_writes: AtomicBool,
}

impl FailingStore {
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DbErr::Custom("connection reset by peer".into()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl DeadLetterStore for FailingStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert(&self, event: &DeadLetterEvent) -> Result<InsertOutcome, StoreError> {
        self.check()?;
        self.inner.insert(event).await
    }

    async fn select_ready_for_retry(
        &self,
        service_name: &str,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<DeadLetterEvent>, StoreError> {
        self.inner.select_ready_for_retry(service_name, now, limit).await
    }

    async fn get(
        &self,
        id: Uuid,
        service_name: &str,
    ) -> Result<Option<DeadLetterEvent>, StoreError> {
        self.inner.get(id, service_name).await
    }

    async fn delete(&self, id: Uuid, service_name: &str) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.delete(id, service_name).await
    }

    async fn record_failure(
        &self,
        id: Uuid,
        service_name: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<RetryOutcome, StoreError> {
        self.check()?;
        self.inner.record_failure(id, service_name, error, now).await
    }

    async fn stats(&self, service_name: &str, now: DateTime<Utc>) -> Result<DlqStats, StoreError> {
        self.inner.stats(service_name, now).await
    }

    async fn list_exhausted(
        &self,
        service_name: &str,
        limit: u64,
    ) -> Result<Vec<DeadLetterEvent>, StoreError> {
        self.inner.list_exhausted(service_name, limit).await
    }
}

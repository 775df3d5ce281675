use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::retry;
use common::{DeadLetterEvent, DlqStats, InsertOutcome, RetryOutcome};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::DeadLetterStore;
use crate::error::StoreError;

type Key = (String, Uuid);

/// In-process store for tests and local runs. Nothing survives a restart.
#[derive(Clone, Default)]
pub struct MemoryDeadLetterStore {
    records: Arc<RwLock<HashMap<Key, DeadLetterEvent>>>,
}

impl MemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records across all services.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    async fn matching<F>(&self, service_name: &str, limit: u64, keep: F) -> Vec<DeadLetterEvent>
    where
        F: Fn(&DeadLetterEvent) -> bool,
    {
        let records = self.records.read().await;
        let mut found: Vec<DeadLetterEvent> = records
            .values()
            .filter(|e| e.service_name == service_name && keep(*e))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.failed_at.cmp(&b.failed_at).then(a.id.cmp(&b.id)));
        found.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        found
    }
}

fn key(id: Uuid, service_name: &str) -> Key {
    (service_name.to_string(), id)
}

#[async_trait]
impl DeadLetterStore for MemoryDeadLetterStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert(&self, event: &DeadLetterEvent) -> Result<InsertOutcome, StoreError> {
        let mut records = self.records.write().await;
        let key = key(event.id, &event.service_name);
        if records.contains_key(&key) {
            return Ok(InsertOutcome::AlreadyPresent);
        }
        records.insert(key, event.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn select_ready_for_retry(
        &self,
        service_name: &str,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<DeadLetterEvent>, StoreError> {
        Ok(self
            .matching(service_name, limit, |e| e.is_ready_for_retry(now))
            .await)
    }

    async fn get(
        &self,
        id: Uuid,
        service_name: &str,
    ) -> Result<Option<DeadLetterEvent>, StoreError> {
        Ok(self.records.read().await.get(&key(id, service_name)).cloned())
    }

    async fn delete(&self, id: Uuid, service_name: &str) -> Result<bool, StoreError> {
        Ok(self
            .records
            .write()
            .await
            .remove(&key(id, service_name))
            .is_some())
    }

    async fn record_failure(
        &self,
        id: Uuid,
        service_name: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<RetryOutcome, StoreError> {
        let mut records = self.records.write().await;
        let Some(event) = records.get_mut(&key(id, service_name)) else {
            return Ok(RetryOutcome::NotFound);
        };

        let next = retry::next_retry_at(event.retry_count, event.max_retries, now);
        event.retry_count = event.retry_count.saturating_add(1);
        event.last_error = error.to_string();
        event.next_retry_at = next;

        Ok(RetryOutcome::after_failure(
            event.retry_count,
            event.max_retries,
            event.next_retry_at,
        ))
    }

    async fn stats(&self, service_name: &str, now: DateTime<Utc>) -> Result<DlqStats, StoreError> {
        let records = self.records.read().await;
        let mut stats = DlqStats::default();
        for event in records.values().filter(|e| e.service_name == service_name) {
            stats.total += 1;
            if event.is_ready_for_retry(now) {
                stats.ready += 1;
            }
            if event.is_exhausted() {
                stats.exhausted += 1;
            }
        }
        Ok(stats)
    }

    async fn list_exhausted(
        &self,
        service_name: &str,
        limit: u64,
    ) -> Result<Vec<DeadLetterEvent>, StoreError> {
        Ok(self
            .matching(service_name, limit, DeadLetterEvent::is_exhausted)
            .await)
    }
}

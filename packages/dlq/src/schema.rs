use sea_orm::sea_query::{Index, PostgresQueryBuilder};
use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, Schema, TransactionTrait};
use tracing::info;

use crate::entity::dead_letter_event;
use crate::error::StoreError;

/// Advisory lock key held while the schema is created ("dlqschem").
const SCHEMA_LOCK_KEY: i64 = 0x646c_7173_6368_656d;

pub const RETRY_POLL_INDEX: &str = "idx_dead_letter_event_retry_poll";
pub const SERVICE_INDEX: &str = "idx_dead_letter_event_service";

// Partial on the poll's own filter. sea-query has no builder for the WHERE clause.
const RETRY_POLL_INDEX_SQL: &str = "\
    CREATE INDEX IF NOT EXISTS idx_dead_letter_event_retry_poll \
    ON dead_letter_event (service_name, next_retry_at) \
    WHERE retry_count < max_retries";

/// Create the dead letter table and its indexes if absent.
///
/// Runs in one transaction under a Postgres advisory lock, so any number of
/// processes may call it at once.
pub async fn ensure_schema(db: &DatabaseConnection) -> Result<(), StoreError> {
    let txn = db.begin().await?;

    txn.execute_unprepared(&format!("SELECT pg_advisory_xact_lock({SCHEMA_LOCK_KEY})"))
        .await?;

    let table = Schema::new(DbBackend::Postgres)
        .create_table_from_entity(dead_letter_event::Entity)
        .if_not_exists()
        .to_string(PostgresQueryBuilder);
    txn.execute_unprepared(&table).await?;

    let service_index = Index::create()
        .if_not_exists()
        .name(SERVICE_INDEX)
        .table(dead_letter_event::Entity)
        .col(dead_letter_event::Column::ServiceName)
        .to_string(PostgresQueryBuilder);
    txn.execute_unprepared(&service_index).await?;

    txn.execute_unprepared(RETRY_POLL_INDEX_SQL).await?;

    txn.commit().await?;

    info!(
        indexes = ?[RETRY_POLL_INDEX, SERVICE_INDEX],
        "Ensured dead_letter_event schema exists"
    );
    Ok(())
}

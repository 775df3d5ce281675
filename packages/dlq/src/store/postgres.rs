use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::retry::{BACKOFF_CAP_MINUTES, MAX_BACKOFF_EXPONENT};
use common::{DeadLetterEvent, DlqStats, InsertOutcome, RetryOutcome};
use sea_orm::sea_query::{Expr, ExprTrait, OnConflict};
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbBackend, DbErr, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Statement,
};
use tokio::sync::OnceCell;
use uuid::Uuid;

use super::DeadLetterStore;
use crate::entity::dead_letter_event::{self, Column, Entity};
use crate::error::StoreError;
use crate::schema;

// Old `retry_count` on the right-hand side of SET, so the CASE sees the
// pre-increment value, same as `common::retry::next_retry_at`.
// $3 is MAX_BACKOFF_EXPONENT, $4 is BACKOFF_CAP_MINUTES.
const RECORD_FAILURE_SQL: &str = r#"
UPDATE dead_letter_event
SET retry_count = retry_count + 1,
    last_error = $1,
    next_retry_at = CASE
        WHEN retry_count + 1 >= max_retries THEN NULL
        ELSE $2::timestamptz + make_interval(
            mins => LEAST(POWER(2, LEAST(retry_count, $3))::bigint, $4)::int
        )
    END
WHERE id = $5 AND service_name = $6
RETURNING *
"#;

const STATS_SQL: &str = r#"
SELECT
    COUNT(*) AS total,
    COUNT(*) FILTER (
        WHERE retry_count < max_retries
          AND (next_retry_at IS NULL OR next_retry_at <= $2)
    ) AS ready,
    COUNT(*) FILTER (WHERE retry_count >= max_retries) AS exhausted
FROM dead_letter_event
WHERE service_name = $1
"#;

/// Postgres-backed store.
///
/// The schema is created lazily on first use, once per store.
pub struct SeaOrmDeadLetterStore {
    db: DatabaseConnection,
    schema_ready: OnceCell<()>,
}

impl SeaOrmDeadLetterStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            schema_ready: OnceCell::new(),
        }
    }

    async fn ready(&self) -> Result<(), StoreError> {
        self.schema_ready
            .get_or_try_init(|| schema::ensure_schema(&self.db))
            .await?;
        Ok(())
    }
}

fn not_exhausted() -> Condition {
    Condition::all().add(Expr::col(Column::RetryCount).lt(Expr::col(Column::MaxRetries)))
}

fn into_events(models: Vec<dead_letter_event::Model>) -> Result<Vec<DeadLetterEvent>, StoreError> {
    models.into_iter().map(|m| m.into_event()).collect()
}

fn count(row: &sea_orm::QueryResult, column: &'static str) -> Result<u64, StoreError> {
    let value: i64 = row.try_get("", column)?;
    u64::try_from(value).map_err(|_| StoreError::OutOfRange {
        field: column,
        value,
    })
}

#[async_trait]
impl DeadLetterStore for SeaOrmDeadLetterStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.ready().await
    }

    async fn insert(&self, event: &DeadLetterEvent) -> Result<InsertOutcome, StoreError> {
        self.ready().await?;
        let model = dead_letter_event::active_model(event)?;

        let result = Entity::insert(model)
            .on_conflict(
                OnConflict::columns([Column::Id, Column::ServiceName])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await;

        match result {
            Ok(0) | Err(DbErr::RecordNotInserted) => Ok(InsertOutcome::AlreadyPresent),
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(e) => Err(e.into()),
        }
    }

    async fn select_ready_for_retry(
        &self,
        service_name: &str,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<DeadLetterEvent>, StoreError> {
        self.ready().await?;

        let models = Entity::find()
            .filter(Column::ServiceName.eq(service_name))
            .filter(not_exhausted())
            .filter(
                Condition::any()
                    .add(Column::NextRetryAt.is_null())
                    .add(Column::NextRetryAt.lte(now)),
            )
            .order_by_asc(Column::FailedAt)
            .order_by_asc(Column::Id)
            .limit(limit)
            .all(&self.db)
            .await?;

        into_events(models)
    }

    async fn get(
        &self,
        id: Uuid,
        service_name: &str,
    ) -> Result<Option<DeadLetterEvent>, StoreError> {
        self.ready().await?;

        Entity::find_by_id((id, service_name.to_string()))
            .one(&self.db)
            .await?
            .map(|m| m.into_event())
            .transpose()
    }

    async fn delete(&self, id: Uuid, service_name: &str) -> Result<bool, StoreError> {
        self.ready().await?;

        let result = Entity::delete_many()
            .filter(Column::Id.eq(id))
            .filter(Column::ServiceName.eq(service_name))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn record_failure(
        &self,
        id: Uuid,
        service_name: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<RetryOutcome, StoreError> {
        self.ready().await?;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            RECORD_FAILURE_SQL,
            [
                error.into(),
                now.into(),
                (MAX_BACKOFF_EXPONENT as i32).into(),
                BACKOFF_CAP_MINUTES.into(),
                id.into(),
                service_name.into(),
            ],
        );

        let Some(model) = Entity::find().from_raw_sql(stmt).one(&self.db).await? else {
            return Ok(RetryOutcome::NotFound);
        };

        let event = model.into_event()?;
        Ok(RetryOutcome::after_failure(
            event.retry_count,
            event.max_retries,
            event.next_retry_at,
        ))
    }

    async fn stats(&self, service_name: &str, now: DateTime<Utc>) -> Result<DlqStats, StoreError> {
        self.ready().await?;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            STATS_SQL,
            [service_name.into(), now.into()],
        );

        let Some(row) = self.db.query_one_raw(stmt).await? else {
            return Ok(DlqStats::default());
        };

        Ok(DlqStats {
            total: count(&row, "total")?,
            ready: count(&row, "ready")?,
            exhausted: count(&row, "exhausted")?,
        })
    }

    async fn list_exhausted(
        &self,
        service_name: &str,
        limit: u64,
    ) -> Result<Vec<DeadLetterEvent>, StoreError> {
        self.ready().await?;

        let models = Entity::find()
            .filter(Column::ServiceName.eq(service_name))
            .filter(Expr::col(Column::RetryCount).gte(Expr::col(Column::MaxRetries)))
            .order_by_asc(Column::FailedAt)
            .order_by_asc(Column::Id)
            .limit(limit)
            .all(&self.db)
            .await?;

        into_events(models)
    }
}

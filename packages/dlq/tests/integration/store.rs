use chrono::Duration;
use dlq::store::{DeadLetterStore, SeaOrmDeadLetterStore};
use sea_orm::{ConnectionTrait, DbBackend, Statement};
use uuid::Uuid;

use ::common::retry;
use ::common::{DlqStats, InsertOutcome, RetryOutcome};

use crate::common::{TestDb, event, instant};

async fn store() -> (TestDb, SeaOrmDeadLetterStore) {
    let test_db = TestDb::spawn().await;
    let store = SeaOrmDeadLetterStore::new(test_db.db.clone());
    (test_db, store)
}

mod schema {
    use super::*;

    async fn index_names(test_db: &TestDb) -> Vec<String> {
        let rows = test_db
            .db
            .query_all_raw(Statement::from_string(
                DbBackend::Postgres,
                "SELECT indexname FROM pg_indexes WHERE tablename = 'dead_letter_event' ORDER BY indexname",
            ))
            .await
            .unwrap();
        rows.iter()
            .map(|row| row.try_get::<String>("", "indexname").unwrap())
            .collect()
    }

    #[tokio::test]
    async fn ensure_schema_is_idempotent() {
        let (test_db, store) = store().await;

        store.ensure_schema().await.unwrap();
        dlq::schema::ensure_schema(&test_db.db).await.unwrap();
        dlq::schema::ensure_schema(&test_db.db).await.unwrap();

        let indexes = index_names(&test_db).await;
        assert!(indexes.contains(&dlq::schema::RETRY_POLL_INDEX.to_string()));
        assert!(indexes.contains(&dlq::schema::SERVICE_INDEX.to_string()));
    }

    #[tokio::test]
    async fn concurrent_processes_can_bootstrap_together() {
        let test_db = TestDb::spawn().await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let url = test_db.url.clone();
            handles.push(tokio::spawn(async move {
                let db = TestDb::connect(&url).await;
                SeaOrmDeadLetterStore::new(db).ensure_schema().await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(index_names(&test_db).await.len(), 3);
    }

    #[tokio::test]
    async fn first_operation_creates_schema() {
        let (_test_db, store) = store().await;
        let stats = store.stats("orders", instant()).await.unwrap();
        assert_eq!(stats, DlqStats::default());
    }
}

mod insert {
    use super::*;

    #[tokio::test]
    async fn duplicate_insert_is_a_noop() {
        let (_test_db, store) = store().await;
        let e = event("orders", instant());

        assert_eq!(store.insert(&e).await.unwrap(), InsertOutcome::Inserted);

        let mut again = e.clone();
        again.last_error = "different".into();
        assert_eq!(
            store.insert(&again).await.unwrap(),
            InsertOutcome::AlreadyPresent
        );

        let stored = store.get(e.id, "orders").await.unwrap().unwrap();
        assert_eq!(stored, e);
        assert_eq!(store.stats("orders", instant()).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn binary_payload_is_preserved() {
        let (_test_db, store) = store().await;
        let mut e = event("orders", instant());
        e.payload = vec![0x00, 0xff, 0x80, 0x7f, 0x00];

        store.insert(&e).await.unwrap();

        let stored = store.get(e.id, "orders").await.unwrap().unwrap();
        assert_eq!(stored.payload, e.payload);
    }
}

mod scoping {
    use super::*;

    #[tokio::test]
    async fn same_id_under_two_services_stays_independent() {
        let (_test_db, store) = store().await;
        let orders = event("orders", instant());
        let billing = event("billing", instant()).with_id(orders.id);
        store.insert(&orders).await.unwrap();
        assert_eq!(
            store.insert(&billing).await.unwrap(),
            InsertOutcome::Inserted
        );

        store
            .record_failure(orders.id, "orders", "nack", instant())
            .await
            .unwrap();
        assert!(store.delete(orders.id, "orders").await.unwrap());

        let untouched = store.get(orders.id, "billing").await.unwrap().unwrap();
        assert_eq!(untouched.retry_count, 0);
        assert_eq!(
            store
                .select_ready_for_retry("billing", instant(), 10)
                .await
                .unwrap()
                .len(),
            1
        );
        assert_eq!(store.stats("orders", instant()).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn delete_with_wrong_service_removes_nothing() {
        let (_test_db, store) = store().await;
        let e = event("orders", instant());
        store.insert(&e).await.unwrap();

        assert!(!store.delete(e.id, "billing").await.unwrap());
        assert!(store.get(e.id, "orders").await.unwrap().is_some());
    }
}

mod retry_selection {
    use super::*;

    #[tokio::test]
    async fn oldest_failures_come_first_up_to_limit() {
        let (_test_db, store) = store().await;
        let now = instant();
        let newest = event("orders", now);
        let oldest = event("orders", now - Duration::minutes(30));
        let middle = event("orders", now - Duration::minutes(10));
        for e in [&newest, &oldest, &middle] {
            store.insert(e).await.unwrap();
        }

        let ids: Vec<Uuid> = store
            .select_ready_for_retry("orders", now, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![oldest.id, middle.id]);
    }

    #[tokio::test]
    async fn skips_records_not_yet_due_and_exhausted_ones() {
        let (_test_db, store) = store().await;
        let now = instant();

        let ready = event("orders", now);
        let mut later = event("orders", now);
        later.next_retry_at = Some(now + Duration::minutes(2));
        let mut due = event("orders", now);
        due.next_retry_at = Some(now);
        let mut exhausted = event("orders", now).with_max_retries(5);
        exhausted.retry_count = 5;
        let mut last_chance = event("orders", now).with_max_retries(5);
        last_chance.retry_count = 4;

        for e in [&ready, &later, &due, &exhausted, &last_chance] {
            store.insert(e).await.unwrap();
        }

        let mut ids: Vec<Uuid> = store
            .select_ready_for_retry("orders", now, 100)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        ids.sort();
        let mut expected = vec![ready.id, due.id, last_chance.id];
        expected.sort();
        assert_eq!(ids, expected);

        assert_eq!(
            store.stats("orders", now).await.unwrap(),
            DlqStats {
                total: 5,
                ready: 3,
                exhausted: 1,
            }
        );
        assert_eq!(
            store.list_exhausted("orders", 10).await.unwrap(),
            vec![exhausted]
        );
    }

    #[tokio::test]
    async fn null_schedule_is_ready_at_any_time() {
        let (_test_db, store) = store().await;
        let e = event("orders", instant());
        store.insert(&e).await.unwrap();

        let long_ago = instant() - Duration::days(3650);
        let found = store
            .select_ready_for_retry("orders", long_ago, 10)
            .await
            .unwrap();
        assert_eq!(found, vec![e]);
    }
}

mod record_failure {
    use super::*;

    #[tokio::test]
    async fn sql_backoff_matches_rust_backoff() {
        let (_test_db, store) = store().await;
        let now = instant();

        for retry_count in 0..40u32 {
            let mut e = event("orders", now).with_max_retries(100);
            e.retry_count = retry_count;
            store.insert(&e).await.unwrap();

            let outcome = store
                .record_failure(e.id, "orders", "nack", now)
                .await
                .unwrap();

            let expected = retry::next_retry_at(retry_count, 100, now).unwrap();
            assert_eq!(
                outcome,
                RetryOutcome::ScheduledForRetry {
                    retry_count: retry_count + 1,
                    next_retry_at: expected,
                },
                "retry_count {retry_count}"
            );
        }
    }

    #[tokio::test]
    async fn successive_failures_double_then_cap() {
        let (_test_db, store) = store().await;
        let e = event("orders", instant()).with_max_retries(10);
        store.insert(&e).await.unwrap();

        let mut now = instant();
        let mut deltas = Vec::new();
        for _ in 0..7 {
            let RetryOutcome::ScheduledForRetry { next_retry_at, .. } = store
                .record_failure(e.id, "orders", "nack", now)
                .await
                .unwrap()
            else {
                panic!("expected reschedule");
            };
            deltas.push((next_retry_at - now).num_minutes());
            now = next_retry_at;
        }
        assert_eq!(deltas, vec![1, 2, 4, 8, 16, 16, 16]);

        let stored = store.get(e.id, "orders").await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 7);
        assert_eq!(stored.last_error, "nack");
    }

    #[tokio::test]
    async fn reaching_the_ceiling_clears_the_schedule() {
        let (_test_db, store) = store().await;
        let e = event("orders", instant()).with_max_retries(2);
        store.insert(&e).await.unwrap();

        store
            .record_failure(e.id, "orders", "first", instant())
            .await
            .unwrap();
        let outcome = store
            .record_failure(e.id, "orders", "second", instant())
            .await
            .unwrap();
        assert_eq!(outcome, RetryOutcome::Exhausted { retry_count: 2 });

        let stored = store.get(e.id, "orders").await.unwrap().unwrap();
        assert_eq!(stored.next_retry_at, None);
        assert_eq!(stored.last_error, "second");
        assert!(
            store
                .select_ready_for_retry("orders", instant(), 10)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn concurrent_failures_are_not_lost() {
        let (_test_db, store) = store().await;
        let store = std::sync::Arc::new(store);
        let e = event("orders", instant()).with_max_retries(100);
        store.insert(&e).await.unwrap();
        let id = e.id;

        let mut handles = Vec::new();
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .record_failure(id, "orders", &format!("failure {i}"), instant())
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = store.get(id, "orders").await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 10);
    }

    #[tokio::test]
    async fn unknown_id_is_reported() {
        let (_test_db, store) = store().await;
        let outcome = store
            .record_failure(Uuid::now_v7(), "orders", "nack", instant())
            .await
            .unwrap();
        assert_eq!(outcome, RetryOutcome::NotFound);
    }
}

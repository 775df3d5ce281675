use std::sync::Arc;

use chrono::Duration;
use dlq::{DeadLetterQueue, SeaOrmDeadLetterStore};

use ::common::{DlqStats, ManualClock, RetryOutcome};

use crate::common::{TestDb, event, instant};

async fn queue(test_db: &TestDb, service: &str) -> (DeadLetterQueue, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(instant()));
    let store = Arc::new(SeaOrmDeadLetterStore::new(test_db.db.clone()));
    let queue = DeadLetterQueue::new(service, store, clock.clone()).unwrap();
    (queue, clock)
}

#[tokio::test]
async fn retry_cycle_through_postgres() {
    let test_db = TestDb::spawn().await;
    let (queue, clock) = queue(&test_db, "orders").await;

    let e1 = event("orders", instant()).with_max_retries(3);
    queue.enqueue(&e1).await.unwrap();

    let ready = queue.get_events_ready_for_retry().await.unwrap();
    assert_eq!(ready, vec![e1.clone()]);

    let outcome = queue.mark_as_failed(e1.id, "broker down").await.unwrap();
    assert_eq!(
        outcome,
        RetryOutcome::ScheduledForRetry {
            retry_count: 1,
            next_retry_at: instant() + Duration::minutes(1),
        }
    );
    assert!(queue.get_events_ready_for_retry().await.unwrap().is_empty());

    clock.advance(Duration::minutes(1) + Duration::seconds(1));
    let ready = queue.get_events_ready_for_retry().await.unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].id, e1.id);
    assert_eq!(ready[0].retry_count, 1);

    assert!(queue.remove(e1.id).await.unwrap());
    assert!(queue.get_events_ready_for_retry().await.unwrap().is_empty());
    assert_eq!(queue.get_stats().await.unwrap(), DlqStats::default());
}

#[tokio::test]
async fn services_share_one_table() {
    let test_db = TestDb::spawn().await;
    let (orders, _) = queue(&test_db, "orders").await;
    let (billing, _) = queue(&test_db, "billing").await;

    orders
        .dead_letter("order.created", b"{}", "nack", 5)
        .await
        .unwrap();
    billing
        .dead_letter("invoice.issued", b"{}", "nack", 5)
        .await
        .unwrap();
    billing
        .dead_letter("invoice.paid", b"{}", "nack", 5)
        .await
        .unwrap();

    assert_eq!(orders.get_stats().await.unwrap().total, 1);
    assert_eq!(billing.get_stats().await.unwrap().total, 2);
    assert!(
        orders
            .get_events_ready_for_retry()
            .await
            .unwrap()
            .iter()
            .all(|e| e.service_name == "orders")
    );
}

#[tokio::test]
async fn exhausted_events_stay_for_operators() {
    let test_db = TestDb::spawn().await;
    let (queue, clock) = queue(&test_db, "orders").await;

    let e = event("orders", instant()).with_max_retries(2);
    queue.enqueue(&e).await.unwrap();

    queue.mark_as_failed(e.id, "nack").await.unwrap();
    clock.advance(Duration::minutes(5));
    let outcome = queue.mark_as_failed(e.id, "still nack").await.unwrap();
    assert_eq!(outcome, RetryOutcome::Exhausted { retry_count: 2 });

    clock.advance(Duration::days(1));
    assert!(queue.get_events_ready_for_retry().await.unwrap().is_empty());
    assert_eq!(
        queue.get_stats().await.unwrap(),
        DlqStats {
            total: 1,
            ready: 0,
            exhausted: 1,
        }
    );
    let exhausted = queue.exhausted_events().await.unwrap();
    assert_eq!(exhausted.len(), 1);
    assert_eq!(exhausted[0].last_error, "still nack");
}

use std::sync::Arc;

use anyhow::Context;
use common::SystemClock;
use dlq::{DeadLetterQueue, RetryDrainWorker, SeaOrmDeadLetterStore};
use mq::{AmqpConnector, ConnectionManager, ExchangeKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use worker::WorkerAppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = WorkerAppConfig::load().context("Failed to load config")?;
    info!(
        service = %config.service.name,
        endpoint = %config.broker.endpoint(),
        client_name = %config.broker.client_name,
        "Drain worker starting"
    );

    let db = dlq::database::init_db(&config.database)
        .await
        .context("Failed to connect to database")?;
    let store = Arc::new(SeaOrmDeadLetterStore::new(db));
    dlq::DeadLetterStore::ensure_schema(store.as_ref())
        .await
        .context("Failed to ensure dead letter schema")?;

    let connections = Arc::new(ConnectionManager::new(
        config.broker.clone(),
        Arc::new(AmqpConnector),
    ));
    // Not fatal: the exchange stays pending and is declared on the next
    // successful connect.
    if let Err(e) = connections
        .declare_exchange(config.dlq.exchange.clone(), ExchangeKind::Topic)
        .await
    {
        error!(exchange = %config.dlq.exchange, error = %e, "Failed to declare exchange");
    }

    let queue = DeadLetterQueue::new(
        config.service.name.clone(),
        store,
        Arc::new(SystemClock),
    )
    .context("Failed to create dead letter queue")?;
    let drain = RetryDrainWorker::new(queue, Arc::clone(&connections), &config.dlq);

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { drain.run(shutdown).await }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    shutdown.cancel();
    if let Err(e) = handle.await {
        error!(error = %e, "Drain worker task panicked");
    }
    connections.shutdown().await;

    info!("Drain worker stopped");
    Ok(())
}

use std::sync::Arc;
use std::time::Duration;

use common::{DeadLetterEvent, DlqConfig, RetryOutcome};
use futures::StreamExt;
use futures::stream;
use mq::ConnectionManager;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::DlqError;
use crate::publisher::publish_once;
use crate::queue::DeadLetterQueue;

/// Tally of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub delivered: usize,
    pub rescheduled: usize,
    pub exhausted: usize,
    /// Redeliveries whose bookkeeping could not be written.
    pub errors: usize,
}

impl DrainReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.rescheduled + self.exhausted + self.errors
    }

    fn record(&mut self, result: Result<RetryOutcome, DlqError>) {
        match result {
            Ok(RetryOutcome::Delivered) => self.delivered += 1,
            Ok(RetryOutcome::ScheduledForRetry { .. }) => self.rescheduled += 1,
            Ok(RetryOutcome::Exhausted { .. }) => self.exhausted += 1,
            Ok(RetryOutcome::NotFound) => {}
            Err(_) => self.errors += 1,
        }
    }
}

/// Periodically redelivers dead-lettered events for one service.
pub struct RetryDrainWorker {
    queue: DeadLetterQueue,
    connections: Arc<ConnectionManager>,
    exchange: String,
    concurrency: usize,
    poll_interval: Duration,
}

impl RetryDrainWorker {
    pub fn new(
        queue: DeadLetterQueue,
        connections: Arc<ConnectionManager>,
        config: &DlqConfig,
    ) -> Self {
        Self {
            queue: queue.with_batch_size(config.batch_size),
            connections,
            exchange: config.exchange.clone(),
            concurrency: config.concurrency.max(1),
            poll_interval: config.poll_interval(),
        }
    }

    /// Fetch one page of due events and try each once.
    ///
    /// The broker connection is checked once up front. When it cannot be
    /// established, the whole page is marked failed without further connect
    /// attempts.
    pub async fn drain_once(&self) -> Result<DrainReport, DlqError> {
        let events = self.queue.get_events_ready_for_retry().await?;
        let mut report = DrainReport::default();
        if events.is_empty() {
            return Ok(report);
        }

        let results: Vec<_> = match self.connections.get_connection().await {
            Ok(_) => {
                stream::iter(events)
                    .map(|event| self.redeliver(event))
                    .buffer_unordered(self.concurrency)
                    .collect()
                    .await
            }
            Err(e) => {
                warn!(
                    service = %self.queue.service_name(),
                    events = events.len(),
                    error = %e,
                    "Broker unavailable, rescheduling drain batch"
                );
                let cause = e.to_string();
                stream::iter(events)
                    .map(|event| self.queue.mark_as_failed(event.id, &cause))
                    .buffer_unordered(self.concurrency)
                    .collect()
                    .await
            }
        };

        for result in results {
            if let Err(e) = &result {
                error!(
                    service = %self.queue.service_name(),
                    error = %e,
                    "Failed to record redelivery result"
                );
            }
            report.record(result);
        }

        info!(
            service = %self.queue.service_name(),
            delivered = report.delivered,
            rescheduled = report.rescheduled,
            exhausted = report.exhausted,
            errors = report.errors,
            "Drain pass finished"
        );
        Ok(report)
    }

    async fn redeliver(&self, event: DeadLetterEvent) -> Result<RetryOutcome, DlqError> {
        let published = publish_once(
            &self.connections,
            &self.exchange,
            &event.event_type,
            &event.payload,
        )
        .await;

        match published {
            Ok(()) => {
                self.queue.remove(event.id).await?;
                info!(
                    service = %self.queue.service_name(),
                    event_id = %event.id,
                    event_type = %event.event_type,
                    retry_count = event.retry_count,
                    "Dead-lettered event delivered"
                );
                Ok(RetryOutcome::Delivered)
            }
            Err(e) => self.queue.mark_as_failed(event.id, &e.to_string()).await,
        }
    }

    /// Drain on a fixed interval until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            service = %self.queue.service_name(),
            poll_interval_secs = self.poll_interval.as_secs(),
            concurrency = self.concurrency,
            "Starting retry drain worker"
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            // Shutdown abandons a pass in flight.
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.drain_once() => {
                    if let Err(e) = result {
                        error!(
                            service = %self.queue.service_name(),
                            error = %e,
                            "Drain pass failed"
                        );
                    }
                }
            }
        }

        info!(service = %self.queue.service_name(), "Retry drain worker stopped");
    }
}

use std::sync::Arc;
use std::time::Duration;

use common::DlqConfig;
use mq::{ConnectionError, ConnectionManager};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::DlqError;
use crate::queue::DeadLetterQueue;

/// How a [`ReliablePublisher::publish`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PublishOutcome {
    /// The broker confirmed the message.
    Published,
    /// Every direct attempt failed; the event is stored for redelivery.
    DeadLettered { event_id: Uuid },
}

/// Publish one message over a fresh channel and close it again.
pub(crate) async fn publish_once(
    connections: &ConnectionManager,
    exchange: &str,
    routing_key: &str,
    payload: &[u8],
) -> Result<(), ConnectionError> {
    let mut channel = connections.create_channel().await?;
    let result = channel.publish(exchange, routing_key, payload).await;
    if let Err(e) = channel.close().await {
        debug!(error = %e, "Failed to close publish channel");
    }
    result
}

/// Publishes events, falling back to the dead letter queue when the broker
/// cannot take them.
#[derive(Clone)]
pub struct ReliablePublisher {
    connections: Arc<ConnectionManager>,
    queue: DeadLetterQueue,
    exchange: String,
    attempts: u32,
    retry_delay: Duration,
    max_retries: u32,
}

impl ReliablePublisher {
    pub fn new(
        connections: Arc<ConnectionManager>,
        queue: DeadLetterQueue,
        config: &DlqConfig,
    ) -> Self {
        Self {
            connections,
            queue,
            exchange: config.exchange.clone(),
            attempts: config.immediate_attempts.max(1),
            retry_delay: config.immediate_retry_delay(),
            max_retries: config.max_retries,
        }
    }

    pub fn queue(&self) -> &DeadLetterQueue {
        &self.queue
    }

    /// Publish `payload` with `event_type` as the routing key.
    ///
    /// Errors only when the event could neither be published nor stored.
    pub async fn publish(
        &self,
        event_type: &str,
        payload: &[u8],
    ) -> Result<PublishOutcome, DlqError> {
        let mut last_error = String::new();

        for attempt in 1..=self.attempts {
            match publish_once(&self.connections, &self.exchange, event_type, payload).await {
                Ok(()) => return Ok(PublishOutcome::Published),
                Err(e) => {
                    warn!(
                        service = %self.queue.service_name(),
                        event_type,
                        attempt,
                        max_attempts = self.attempts,
                        error = %e,
                        "Publish failed"
                    );
                    last_error = e.to_string();
                }
            }

            if attempt < self.attempts && !self.retry_delay.is_zero() {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        let event = self
            .queue
            .dead_letter(event_type, payload, &last_error, self.max_retries)
            .await?;

        Ok(PublishOutcome::DeadLettered { event_id: event.id })
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use common::config::BrokerConfig;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tracing::debug;

use crate::config::amqp_uri;
use crate::error::ConnectionError;
use crate::transport::{
    BrokerChannel, BrokerConnection, Connector, ExchangeDeclaration, ExchangeKind,
};

/// AMQP reply code for a normal close.
const REPLY_SUCCESS: u16 = 200;

/// AMQP delivery mode for messages that survive a broker restart.
const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// Connects to RabbitMQ-compatible brokers over AMQP 0.9.1.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmqpConnector;

#[async_trait]
impl Connector for AmqpConnector {
    async fn connect(
        &self,
        config: &BrokerConfig,
    ) -> Result<Arc<dyn BrokerConnection>, ConnectionError> {
        let properties = ConnectionProperties::default()
            .with_connection_name(config.client_name.clone().into());

        let connection = Connection::connect_uri(amqp_uri(config), properties)
            .await
            .map_err(|e| ConnectionError::Unreachable {
                endpoint: config.endpoint(),
                cause: e.to_string(),
            })?;

        Ok(Arc::new(AmqpConnection { inner: connection }))
    }
}

pub struct AmqpConnection {
    inner: Connection,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }

    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, ConnectionError> {
        let channel = self.inner.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        debug!(channel_id = channel.id(), "Opened broker channel");
        Ok(Box::new(AmqpChannel { inner: channel }))
    }

    async fn close(&self, reason: &str) -> Result<(), ConnectionError> {
        self.inner.close(REPLY_SUCCESS, reason).await?;
        Ok(())
    }
}

pub struct AmqpChannel {
    inner: Channel,
}

fn exchange_kind(kind: ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        ExchangeKind::Headers => lapin::ExchangeKind::Headers,
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), ConnectionError> {
        let properties = BasicProperties::default().with_delivery_mode(DELIVERY_MODE_PERSISTENT);

        let confirmation = self
            .inner
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|e| ConnectionError::Publish(e.to_string()))?
            .await
            .map_err(|e| ConnectionError::Publish(e.to_string()))?;

        match confirmation {
            Confirmation::Nack(_) => Err(ConnectionError::Publish(format!(
                "Broker rejected message for exchange '{exchange}'"
            ))),
            _ => Ok(()),
        }
    }

    async fn declare_exchange(
        &mut self,
        declaration: &ExchangeDeclaration,
    ) -> Result<(), ConnectionError> {
        let options = ExchangeDeclareOptions {
            durable: true,
            ..Default::default()
        };

        self.inner
            .exchange_declare(
                &declaration.name,
                exchange_kind(declaration.kind),
                options,
                FieldTable::default(),
            )
            .await
            .map_err(|e| ConnectionError::Topology(e.to_string()))
    }

    async fn close(self: Box<Self>) -> Result<(), ConnectionError> {
        self.inner.close(REPLY_SUCCESS, "channel released").await?;
        Ok(())
    }
}

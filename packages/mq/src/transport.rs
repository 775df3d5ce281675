use std::sync::Arc;

use async_trait::async_trait;
use common::config::BrokerConfig;

use crate::error::ConnectionError;

/// Exchange types understood by AMQP-style brokers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    Direct,
    Fanout,
    Topic,
    Headers,
}

/// An exchange the manager re-declares after a reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExchangeDeclaration {
    pub name: String,
    pub kind: ExchangeKind,
}

/// Opens physical connections to a broker.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        config: &BrokerConfig,
    ) -> Result<Arc<dyn BrokerConnection>, ConnectionError>;
}

/// One physical broker connection. Safe to share; channels are not.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    fn is_open(&self) -> bool;

    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, ConnectionError>;

    async fn close(&self, reason: &str) -> Result<(), ConnectionError>;
}

/// A lightweight session over a connection.
///
/// Not `Sync`, and every operation takes `&mut self`: a channel has one owner.
#[async_trait]
pub trait BrokerChannel: Send {
    /// Publish and wait for the broker to confirm.
    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), ConnectionError>;

    async fn declare_exchange(
        &mut self,
        declaration: &ExchangeDeclaration,
    ) -> Result<(), ConnectionError>;

    async fn close(self: Box<Self>) -> Result<(), ConnectionError>;
}

pub mod amqp;
pub mod config;
pub mod error;
pub mod manager;
pub mod memory;
pub mod transport;

pub use amqp::AmqpConnector;
pub use error::ConnectionError;
pub use manager::ConnectionManager;
pub use memory::{MemoryBroker, PublishedMessage};
pub use transport::{BrokerChannel, BrokerConnection, Connector, ExchangeDeclaration, ExchangeKind};

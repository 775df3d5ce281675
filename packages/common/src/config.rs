use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::dlq::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_RETRIES};

/// Identity of the service that owns a partition of the dead letter table.
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    /// Scoping key for every dead letter query. Free text; not registered anywhere.
    pub name: String,
}

/// Postgres connection settings.
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    /// Default: 10.
    #[serde(default = "default_db_max_connections")]
    pub max_connections: u32,
    /// Default: 1.
    #[serde(default = "default_db_min_connections")]
    pub min_connections: u32,
    /// Default: 8.
    #[serde(default = "default_db_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Log every SQL statement. Default: false.
    #[serde(default)]
    pub sqlx_logging: bool,
}

fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    8
}

/// Message broker connection settings.
#[derive(Deserialize, Clone)]
pub struct BrokerConfig {
    /// Default: "localhost".
    #[serde(default = "default_broker_host")]
    pub host: String,
    /// Default: 5672.
    #[serde(default = "default_broker_port")]
    pub port: u16,
    /// Default: "guest".
    #[serde(default = "default_broker_credential")]
    pub username: String,
    /// Default: "guest".
    #[serde(default = "default_broker_credential")]
    pub password: String,
    /// Default: "/".
    #[serde(default = "default_virtual_host", alias = "virtualHost")]
    pub virtual_host: String,
    /// Shown by the broker next to this connection. Default: "courier".
    #[serde(default = "default_client_name", alias = "clientName")]
    pub client_name: String,
    /// Heartbeat interval negotiated with the broker. Default: 60.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u16,
    /// Re-establish a lost connection on next use. Default: true.
    #[serde(default = "default_true")]
    pub automatic_recovery: bool,
    /// Re-declare exchanges after a reconnect. Default: true.
    #[serde(default = "default_true")]
    pub topology_recovery: bool,
    /// Default: 10.
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
    /// Bound on a graceful close at shutdown. Default: 5.
    #[serde(default = "default_close_grace_period_secs")]
    pub close_grace_period_secs: u64,
    /// Use `amqps`. Default: false.
    #[serde(default)]
    pub tls: bool,
}

fn default_broker_host() -> String {
    "localhost".into()
}
fn default_broker_port() -> u16 {
    5672
}
fn default_broker_credential() -> String {
    "guest".into()
}
fn default_virtual_host() -> String {
    "/".into()
}
fn default_client_name() -> String {
    "courier".into()
}
fn default_heartbeat_secs() -> u16 {
    60
}
fn default_true() -> bool {
    true
}
fn default_connection_timeout_secs() -> u64 {
    10
}
fn default_close_grace_period_secs() -> u64 {
    5
}

impl BrokerConfig {
    /// `host:port/vhost`, for logs.
    pub fn endpoint(&self) -> String {
        format!("{}:{}{}", self.host, self.port, self.vhost_path())
    }

    fn vhost_path(&self) -> String {
        if self.virtual_host.starts_with('/') {
            self.virtual_host.clone()
        } else {
            format!("/{}", self.virtual_host)
        }
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn close_grace_period(&self) -> Duration {
        Duration::from_secs(self.close_grace_period_secs)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            username: default_broker_credential(),
            password: default_broker_credential(),
            virtual_host: default_virtual_host(),
            client_name: default_client_name(),
            heartbeat_secs: default_heartbeat_secs(),
            automatic_recovery: true,
            topology_recovery: true,
            connection_timeout_secs: default_connection_timeout_secs(),
            close_grace_period_secs: default_close_grace_period_secs(),
            tls: false,
        }
    }
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("virtual_host", &self.virtual_host)
            .field("client_name", &self.client_name)
            .field("heartbeat_secs", &self.heartbeat_secs)
            .field("automatic_recovery", &self.automatic_recovery)
            .field("topology_recovery", &self.topology_recovery)
            .field("connection_timeout_secs", &self.connection_timeout_secs)
            .field("close_grace_period_secs", &self.close_grace_period_secs)
            .field("tls", &self.tls)
            .finish()
    }
}

/// Dead letter handling settings.
#[derive(Debug, Deserialize, Clone)]
pub struct DlqConfig {
    /// Retry ceiling stamped on new records. Default: 5.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Records fetched per drain pass. Default: 100.
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    /// Seconds between drain passes. Default: 30.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Redeliveries in flight per drain pass. Default: 8.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Exchange events are published to. Default: "domain.events".
    #[serde(default = "default_exchange")]
    pub exchange: String,
    /// Direct publish attempts before an event is dead-lettered. Default: 3.
    #[serde(default = "default_immediate_attempts")]
    pub immediate_attempts: u32,
    /// Pause between direct publish attempts. Default: 200.
    #[serde(default = "default_immediate_retry_delay_ms")]
    pub immediate_retry_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_batch_size() -> u64 {
    DEFAULT_BATCH_SIZE
}
fn default_poll_interval_secs() -> u64 {
    30
}
fn default_concurrency() -> usize {
    8
}
fn default_exchange() -> String {
    "domain.events".into()
}
fn default_immediate_attempts() -> u32 {
    3
}
fn default_immediate_retry_delay_ms() -> u64 {
    200
}

impl DlqConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn immediate_retry_delay(&self) -> Duration {
        Duration::from_millis(self.immediate_retry_delay_ms)
    }
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            batch_size: default_batch_size(),
            poll_interval_secs: default_poll_interval_secs(),
            concurrency: default_concurrency(),
            exchange: default_exchange(),
            immediate_attempts: default_immediate_attempts(),
            immediate_retry_delay_ms: default_immediate_retry_delay_ms(),
        }
    }
}

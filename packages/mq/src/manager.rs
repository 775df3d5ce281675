use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use common::config::BrokerConfig;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::error::ConnectionError;
use crate::transport::{
    BrokerChannel, BrokerConnection, Connector, ExchangeDeclaration, ExchangeKind,
};

/// Owns the single broker connection of a process.
///
/// Construct once at startup and share as `Arc<ConnectionManager>`. The
/// connection is opened lazily on first use and re-opened on the next use
/// after it drops. Channels are handed out fresh per caller.
pub struct ConnectionManager {
    config: BrokerConfig,
    connector: Arc<dyn Connector>,
    current: RwLock<Option<Arc<dyn BrokerConnection>>>,
    /// Serializes connection attempts and topology declaration.
    connect_lock: Mutex<()>,
    /// Every exchange ever requested, re-declared on recovered connections.
    topology: Mutex<Vec<ExchangeDeclaration>>,
    /// Exchanges not yet declared on the current connection.
    pending: Mutex<Vec<ExchangeDeclaration>>,
    ever_connected: AtomicBool,
    disposed: AtomicBool,
}

impl ConnectionManager {
    pub fn new(config: BrokerConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            current: RwLock::new(None),
            connect_lock: Mutex::new(()),
            topology: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            ever_connected: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Return the open connection, establishing one if needed.
    ///
    /// Exchanges still pending are declared before the connection is handed
    /// out. Connect and declaration failures are returned as-is and not
    /// retried here.
    pub async fn get_connection(&self) -> Result<Arc<dyn BrokerConnection>, ConnectionError> {
        self.ensure_not_disposed()?;

        if let Some(conn) = self.open_connection().await
            && self.pending.lock().await.is_empty()
        {
            return Ok(conn);
        }

        let _guard = self.connect_lock.lock().await;

        // Another caller may have connected while we waited.
        self.ensure_not_disposed()?;
        let conn = match self.open_connection().await {
            Some(conn) => conn,
            None => self.reconnect().await?,
        };

        self.declare_pending(conn.as_ref()).await?;
        Ok(conn)
    }

    /// Open a new channel on the current connection.
    pub async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, ConnectionError> {
        let conn = self.get_connection().await?;
        conn.create_channel().await
    }

    /// Declare an exchange and remember it for topology recovery.
    ///
    /// The exchange is remembered even when the broker cannot be reached, and
    /// is declared on the next connection that gets established.
    pub async fn declare_exchange(
        &self,
        name: impl Into<String>,
        kind: ExchangeKind,
    ) -> Result<(), ConnectionError> {
        let declaration = ExchangeDeclaration {
            name: name.into(),
            kind,
        };

        {
            let mut topology = self.topology.lock().await;
            if !topology.contains(&declaration) {
                topology.push(declaration.clone());
            }
        }
        {
            let mut pending = self.pending.lock().await;
            if !pending.contains(&declaration) {
                pending.push(declaration);
            }
        }

        self.get_connection().await.map(|_| ())
    }

    /// Whether a connection is currently open. Never connects.
    pub async fn is_connected(&self) -> bool {
        self.open_connection().await.is_some()
    }

    /// Close the connection, waiting at most the configured grace period.
    ///
    /// Safe to call more than once; later calls do nothing.
    pub async fn shutdown(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let _guard = self.connect_lock.lock().await;
        let Some(conn) = self.current.write().await.take() else {
            return;
        };

        if !conn.is_open() {
            return;
        }

        let grace = self.config.close_grace_period();
        match tokio::time::timeout(grace, conn.close("shutdown")).await {
            Ok(Ok(())) => info!(
                endpoint = %self.config.endpoint(),
                client_name = %self.config.client_name,
                "Broker connection closed"
            ),
            Ok(Err(e)) => warn!(error = %e, "Broker connection closed with error"),
            Err(_) => warn!(
                grace_period = ?grace,
                "Broker connection did not close within grace period, abandoning it"
            ),
        }
    }

    fn ensure_not_disposed(&self) -> Result<(), ConnectionError> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(ConnectionError::Disposed)
        } else {
            Ok(())
        }
    }

    async fn open_connection(&self) -> Option<Arc<dyn BrokerConnection>> {
        self.current
            .read()
            .await
            .as_ref()
            .filter(|conn| conn.is_open())
            .cloned()
    }

    async fn connect(&self) -> Result<Arc<dyn BrokerConnection>, ConnectionError> {
        let timeout = self.config.connection_timeout();
        let result = match tokio::time::timeout(timeout, self.connector.connect(&self.config)).await
        {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout(timeout)),
        };

        match result {
            Ok(conn) => {
                info!(
                    endpoint = %self.config.endpoint(),
                    client_name = %self.config.client_name,
                    heartbeat_secs = self.config.heartbeat_secs,
                    "Broker connection established"
                );
                Ok(conn)
            }
            Err(e) => {
                error!(
                    endpoint = %self.config.endpoint(),
                    client_name = %self.config.client_name,
                    error = %e,
                    "Broker connection failed"
                );
                Err(e)
            }
        }
    }

    /// Open and store a fresh connection. Caller holds `connect_lock`.
    async fn reconnect(&self) -> Result<Arc<dyn BrokerConnection>, ConnectionError> {
        let reconnecting = self.ever_connected.load(Ordering::SeqCst);
        if reconnecting {
            if !self.config.automatic_recovery {
                warn!(
                    endpoint = %self.config.endpoint(),
                    "Broker connection lost and automatic recovery is disabled"
                );
                return Err(ConnectionError::Closed);
            }
            warn!(
                endpoint = %self.config.endpoint(),
                "Broker connection lost, re-establishing"
            );
        }

        let conn = self.connect().await?;
        *self.current.write().await = Some(Arc::clone(&conn));
        self.ever_connected.store(true, Ordering::SeqCst);

        if reconnecting && self.config.topology_recovery {
            let topology = self.topology.lock().await.clone();
            *self.pending.lock().await = topology;
        }
        Ok(conn)
    }

    /// Declare every pending exchange on `conn`. Caller holds `connect_lock`.
    ///
    /// Declared exchanges leave the pending list one by one, so a failure
    /// part-way is resumed by the next caller.
    async fn declare_pending(&self, conn: &dyn BrokerConnection) -> Result<(), ConnectionError> {
        let mut pending = self.pending.lock().await;
        if pending.is_empty() {
            return Ok(());
        }

        let count = pending.len();
        let mut channel = conn.create_channel().await?;
        while let Some(declaration) = pending.first().cloned() {
            if let Err(e) = channel.declare_exchange(&declaration).await {
                warn!(
                    exchange = %declaration.name,
                    error = %e,
                    "Failed to declare exchange"
                );
                return Err(e);
            }
            pending.remove(0);
        }
        if let Err(e) = channel.close().await {
            warn!(error = %e, "Failed to close topology channel");
        }

        info!(exchanges = count, "Declared broker topology");
        Ok(())
    }
}

//! In-memory broker for tests and local runs.
//!
//! Publishes are recorded instead of routed. Outages, dropped connections
//! and broker-side rejections can be switched on and off at runtime.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::config::BrokerConfig;

use crate::error::ConnectionError;
use crate::transport::{BrokerChannel, BrokerConnection, Connector, ExchangeDeclaration};

/// A message accepted by the in-memory broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
struct BrokerState {
    available: AtomicBool,
    reject_publishes: AtomicBool,
    reject_declarations: AtomicBool,
    /// Bumped by `sever`; connections from an older generation report closed.
    generation: AtomicU64,
    connects: AtomicUsize,
    connect_attempts: AtomicUsize,
    connect_latency_ms: AtomicU64,
    published: Mutex<Vec<PublishedMessage>>,
    declarations: Mutex<Vec<ExchangeDeclaration>>,
}

/// In-memory stand-in for an AMQP broker.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(BrokerState {
                available: AtomicBool::new(true),
                reject_publishes: AtomicBool::new(false),
                reject_declarations: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                connects: AtomicUsize::new(0),
                connect_attempts: AtomicUsize::new(0),
                connect_latency_ms: AtomicU64::new(0),
                published: Mutex::new(Vec::new()),
                declarations: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Simulate the broker going down or coming back.
    ///
    /// While unavailable, connects fail and existing connections report closed.
    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
    }

    /// Make every publish fail as if the broker nacked it.
    pub fn fail_publishes(&self, reject: bool) {
        self.state.reject_publishes.store(reject, Ordering::SeqCst);
    }

    /// Make every exchange declaration fail while leaving connections up.
    pub fn fail_declarations(&self, reject: bool) {
        self.state.reject_declarations.store(reject, Ordering::SeqCst);
    }

    /// Drop every open connection, as a network partition would.
    pub fn sever(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn set_connect_latency(&self, latency: Duration) {
        self.state
            .connect_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of successful connects so far.
    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Number of connects tried, successful or not.
    pub fn connect_attempts(&self) -> usize {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.state.published).clone()
    }

    /// Every exchange declaration received, in order, including repeats.
    pub fn declarations(&self) -> Vec<ExchangeDeclaration> {
        lock(&self.state.declarations).clone()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn connect(
        &self,
        config: &BrokerConfig,
    ) -> Result<Arc<dyn BrokerConnection>, ConnectionError> {
        self.state.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let latency = self.state.connect_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        } else {
            tokio::task::yield_now().await;
        }

        if !self.state.available.load(Ordering::SeqCst) {
            return Err(ConnectionError::Unreachable {
                endpoint: config.endpoint(),
                cause: "connection refused".into(),
            });
        }

        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryConnection {
            state: Arc::clone(&self.state),
            generation: self.state.generation.load(Ordering::SeqCst),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryConnection {
    state: Arc<BrokerState>,
    generation: u64,
    closed: AtomicBool,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && self.state.available.load(Ordering::SeqCst)
            && self.state.generation.load(Ordering::SeqCst) == self.generation
    }

    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::Channel("connection is closed".into()));
        }
        Ok(Box::new(MemoryChannel {
            state: Arc::clone(&self.state),
            generation: self.generation,
        }))
    }

    async fn close(&self, _reason: &str) -> Result<(), ConnectionError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MemoryChannel {
    state: Arc<BrokerState>,
    generation: u64,
}

impl MemoryChannel {
    fn ensure_open(&self) -> Result<(), ConnectionError> {
        if !self.state.available.load(Ordering::SeqCst)
            || self.state.generation.load(Ordering::SeqCst) != self.generation
        {
            return Err(ConnectionError::Channel("connection is closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        if self.state.reject_publishes.load(Ordering::SeqCst) {
            return Err(ConnectionError::Publish(format!(
                "Broker rejected message for exchange '{exchange}'"
            )));
        }

        lock(&self.state.published).push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    async fn declare_exchange(
        &mut self,
        declaration: &ExchangeDeclaration,
    ) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        if self.state.reject_declarations.load(Ordering::SeqCst) {
            return Err(ConnectionError::Topology(format!(
                "Broker refused to declare exchange '{}'",
                declaration.name
            )));
        }
        lock(&self.state.declarations).push(declaration.clone());
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), ConnectionError> {
        Ok(())
    }
}

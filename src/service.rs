use crate::config::GatewayConfig;
use crate::error::LeanMqError;
use crate::gateway::Gateway;
use crate::queue::Queue;
use crate::registry::{QueueInfo, Registry};
use crate::sweeper::Sweeper;
use crate::transaction::Transaction;

/// Top-level facade wiring the Gateway, Registry, Queue handles,
/// Transactions and Sweeper together (spec §6.4's `QueueService`).
///
/// Construction opens the backend connection pool; [`QueueService::close`]
/// releases it. After close, every other method fails with
/// [`LeanMqError::AlreadyClosed`].
pub struct QueueService {
    gateway: Gateway,
    registry: Registry,
}

impl QueueService {
    pub async fn connect(config: GatewayConfig) -> Result<Self, LeanMqError> {
        let gateway = Gateway::connect(config).await?;
        let registry = Registry::new(gateway.clone());
        Ok(Self { gateway, registry })
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub async fn create_queue_pair(&self, name: &str) -> Result<(Queue, Queue), LeanMqError> {
        self.registry.create_pair(name).await
    }

    pub async fn get_queue(&self, name: &str) -> Result<Option<Queue>, LeanMqError> {
        self.registry.get(name).await
    }

    pub async fn get_dead_letter_queue(&self, name: &str) -> Result<Option<Queue>, LeanMqError> {
        self.registry.get_dlq(name).await
    }

    pub async fn list_queues(&self) -> Result<Vec<QueueInfo>, LeanMqError> {
        self.registry.list().await
    }

    pub async fn delete_queue(&self, name: &str, also_dlq: bool) -> Result<(), LeanMqError> {
        self.registry.delete(name, also_dlq).await
    }

    /// Scans every registered queue and removes messages past their TTL
    /// (spec §4.E). The embedding application decides when/how often to
    /// call this; LeanMQ does not schedule it internally.
    pub async fn sweep_expired(&self) -> Result<usize, LeanMqError> {
        Sweeper::new(self.registry.clone()).sweep_expired().await
    }

    /// Opens a new multi-publish [`Transaction`] builder (spec §4.D).
    pub fn transaction(&self) -> Transaction {
        Transaction::new(self.gateway.clone())
    }

    pub async fn ping(&self) -> Result<(), LeanMqError> {
        self.gateway.ping().await
    }

    pub fn close(&self) {
        self.gateway.close();
    }
}

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::warn;

use crate::config::GatewayConfig;
use crate::error::{ErrorCategory, LeanMqError, RetryStrategy};

/// Single connection abstraction over the stream backend (spec §4.A).
///
/// Reference-counted (`Clone` is cheap, an `Arc` underneath) so every
/// higher component — Registry, Queue, Transaction, Sweeper — shares one
/// pool. Every outbound call made through [`Gateway::call`] is wrapped in
/// exponential-backoff retry for connection-shaped errors only; logic
/// errors (bad id, wrong type) are never retried.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

struct Inner {
    manager: ConnectionManager,
    config: GatewayConfig,
    closed: AtomicBool,
}

impl Gateway {
    pub async fn connect(config: GatewayConfig) -> Result<Self, LeanMqError> {
        let client = redis::Client::open(config.redis_url())
            .map_err(|e| LeanMqError::ConnectionFailure(e.to_string()))?;
        let manager = tokio::time::timeout(
            std::time::Duration::from_secs(config.connection_timeout_secs),
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| LeanMqError::ConnectionFailure("connection timed out".into()))?
        .map_err(|e| LeanMqError::ConnectionFailure(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(Inner {
                manager,
                config,
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn prefix(&self) -> &str {
        &self.inner.config.prefix
    }

    /// Prepends the configured prefix to a bare key name.
    pub fn key(&self, name: &str) -> String {
        format!("{}{}", self.inner.config.prefix, name)
    }

    fn connection(&self) -> Result<ConnectionManager, LeanMqError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(LeanMqError::AlreadyClosed);
        }
        Ok(self.inner.manager.clone())
    }

    /// Verifies backend liveness with a `PING`.
    pub async fn ping(&self) -> Result<(), LeanMqError> {
        self.call(|mut conn| async move {
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    /// Runs `f` against a connection, retrying transient (connection-shaped)
    /// failures with exponential backoff bounded by `max_retries` /
    /// `retry_interval`. Logic failures are surfaced on the first attempt.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, LeanMqError>
    where
        F: Fn(ConnectionManager) -> Fut,
        Fut: Future<Output = Result<T, LeanMqError>>,
    {
        let max_retries = self.inner.config.max_retries;
        let base_delay_ms = self.inner.config.retry_interval_secs.saturating_mul(1000);
        let mut attempt = 0u32;
        loop {
            let conn = self.connection()?;
            match f(conn).await {
                Ok(v) => return Ok(v),
                Err(err) => {
                    let category = err.category();
                    if category != ErrorCategory::Transient {
                        return Err(err);
                    }
                    let strategy = category.retry_strategy(max_retries, base_delay_ms.max(1));
                    attempt += 1;
                    match strategy.delay_for_attempt(attempt) {
                        Some(delay) => {
                            warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying after transient backend error");
                            crate::metrics::record_gateway_retry();
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            return Err(LeanMqError::ConnectionFailure(format!(
                                "exhausted {max_retries} retries: {err}"
                            )));
                        }
                    }
                }
            }
        }
    }

    /// Releases pool resources. Further use of this (or any cloned) handle
    /// fails with [`LeanMqError::AlreadyClosed`].
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Adds `name` to the backend-side registry set (spec §4.B's
    /// `{prefix}__queues`), used by [`crate::registry::Registry`].
    pub(crate) async fn sadd_registry(&self, name: &str) -> Result<(), LeanMqError> {
        let set_key = self.key("__queues");
        self.call(move |mut conn| {
            let set_key = set_key.clone();
            let name = name.to_string();
            async move {
                let _: i64 = conn.sadd(&set_key, &name).await?;
                Ok(())
            }
        })
        .await
    }
}

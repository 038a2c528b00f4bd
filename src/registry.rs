use chrono::Utc;
use redis::AsyncCommands;
use tracing::info;

use crate::error::LeanMqError;
use crate::gateway::Gateway;
use crate::queue::Queue;

const DLQ_SUFFIX: &str = ":dlq";
const GROUP_SUFFIX: &str = "__group";
const META_SUFFIX: &str = "__meta";
const REGISTRY_SET: &str = "__queues";

/// A registered queue's metadata (spec §3.1), as returned by
/// [`Registry::list`].
#[derive(Debug, Clone)]
pub struct QueueInfo {
    pub name: String,
    pub is_dlq: bool,
    pub created_at_ms: i64,
}

/// Tracks known queue names and their metadata (spec §4.B). Backed by a
/// backend-side set at `{prefix}__queues`; the registry never holds
/// in-process state beyond the [`Gateway`] handle, so multiple
/// `Registry` instances (or processes) observe the same set.
#[derive(Clone)]
pub struct Registry {
    gateway: Gateway,
}

impl Registry {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Derives the paired DLQ name for a non-DLQ queue, per spec §3.1.
    pub fn dlq_name(name: &str) -> String {
        format!("{name}{DLQ_SUFFIX}")
    }

    pub(crate) fn is_dlq_name(name: &str) -> bool {
        name.ends_with(DLQ_SUFFIX)
    }

    pub(crate) fn consumer_group_name(name: &str) -> String {
        format!("{name}{GROUP_SUFFIX}")
    }

    fn meta_key(&self, name: &str) -> String {
        self.gateway.key(&format!("{name}{META_SUFFIX}"))
    }

    /// Idempotently creates a queue and its DLQ sibling, ensuring the main
    /// queue's consumer group exists (spec §4.B). Returns handles to both.
    pub async fn create_pair(&self, name: &str) -> Result<(Queue, Queue), LeanMqError> {
        if Self::is_dlq_name(name) {
            return Err(LeanMqError::QueueFailure {
                queue: name.to_string(),
                reason: "DLQs cannot themselves have a DLQ".into(),
            });
        }
        let dlq_name = Self::dlq_name(name);

        self.register_if_absent(name, false).await?;
        self.register_if_absent(&dlq_name, true).await?;

        let main = Queue::new(self.gateway.clone(), name.to_string(), false);
        let dlq = Queue::new(self.gateway.clone(), dlq_name, true);

        main.ensure_consumer_group().await?;
        info!(queue = name, "queue pair created");

        Ok((main, dlq))
    }

    async fn register_if_absent(&self, name: &str, is_dlq: bool) -> Result<(), LeanMqError> {
        let meta_key = self.meta_key(name);
        let set_key = self.gateway.key(REGISTRY_SET);
        let name_owned = name.to_string();

        self.gateway
            .call(move |mut conn| {
                let meta_key = meta_key.clone();
                let set_key = set_key.clone();
                let name = name_owned.clone();
                async move {
                    let exists: bool = conn.hexists(&meta_key, "created_at").await?;
                    if !exists {
                        let now = Utc::now().timestamp_millis();
                        let _: () = conn
                            .hset_multiple(
                                &meta_key,
                                &[
                                    ("created_at", now.to_string()),
                                    ("is_dlq", (is_dlq as u8).to_string()),
                                ],
                            )
                            .await?;
                    }
                    let _: i64 = conn.sadd(&set_key, &name).await?;
                    Ok(())
                }
            })
            .await
    }

    /// Returns a handle to `name` if it is a known queue.
    pub async fn get(&self, name: &str) -> Result<Option<Queue>, LeanMqError> {
        self.get_any(name, Self::is_dlq_name(name)).await
    }

    /// Returns a handle to `{name}:dlq` if known.
    pub async fn get_dlq(&self, name: &str) -> Result<Option<Queue>, LeanMqError> {
        self.get_any(&Self::dlq_name(name), true).await
    }

    async fn get_any(&self, name: &str, is_dlq: bool) -> Result<Option<Queue>, LeanMqError> {
        let set_key = self.gateway.key(REGISTRY_SET);
        let name_owned = name.to_string();
        let is_member: bool = self
            .gateway
            .call(move |mut conn| {
                let set_key = set_key.clone();
                let name = name_owned.clone();
                async move { Ok(conn.sismember(&set_key, &name).await?) }
            })
            .await?;

        if !is_member {
            return Ok(None);
        }
        Ok(Some(Queue::new(self.gateway.clone(), name.to_string(), is_dlq)))
    }

    /// Snapshot of all registered queues with live counts (spec §4.B).
    pub async fn list(&self) -> Result<Vec<QueueInfo>, LeanMqError> {
        let set_key = self.gateway.key(REGISTRY_SET);
        let names: Vec<String> = self
            .gateway
            .call(move |mut conn| {
                let set_key = set_key.clone();
                async move { Ok(conn.smembers(&set_key).await?) }
            })
            .await?;

        let mut infos = Vec::with_capacity(names.len());
        for name in names {
            let meta_key = self.meta_key(&name);
            let created_at_ms: Option<i64> = self
                .gateway
                .call(move |mut conn| {
                    let meta_key = meta_key.clone();
                    async move {
                        let val: Option<String> = conn.hget(&meta_key, "created_at").await?;
                        Ok(val.and_then(|v| v.parse().ok()))
                    }
                })
                .await?;
            infos.push(QueueInfo {
                is_dlq: Self::is_dlq_name(&name),
                created_at_ms: created_at_ms.unwrap_or(0),
                name,
            });
        }
        Ok(infos)
    }

    /// Unregisters `name` (and its DLQ sibling when `also_dlq` is true) and
    /// removes the underlying stream(s) entirely (spec §4.B).
    pub async fn delete(&self, name: &str, also_dlq: bool) -> Result<(), LeanMqError> {
        let set_key = self.gateway.key(REGISTRY_SET);
        let meta_key = self.meta_key(name);
        let stream_key = self.gateway.key(name);
        let name_owned = name.to_string();

        self.gateway
            .call(move |mut conn| {
                let set_key = set_key.clone();
                let meta_key = meta_key.clone();
                let stream_key = stream_key.clone();
                let name = name_owned.clone();
                async move {
                    let mut pipe = redis::pipe();
                    pipe.atomic()
                        .srem(&set_key, &name)
                        .ignore()
                        .del(&meta_key)
                        .ignore()
                        .del(&stream_key)
                        .ignore();
                    let _: () = pipe.query_async(&mut conn).await?;
                    Ok(())
                }
            })
            .await?;

        if also_dlq && !Self::is_dlq_name(name) {
            let dlq = Self::dlq_name(name);
            let set_key = self.gateway.key(REGISTRY_SET);
            let meta_key = self.meta_key(&dlq);
            let stream_key = self.gateway.key(&dlq);
            self.gateway
                .call(move |mut conn| {
                    let set_key = set_key.clone();
                    let meta_key = meta_key.clone();
                    let stream_key = stream_key.clone();
                    let dlq = dlq.clone();
                    async move {
                        let mut pipe = redis::pipe();
                        pipe.atomic()
                            .srem(&set_key, &dlq)
                            .ignore()
                            .del(&meta_key)
                            .ignore()
                            .del(&stream_key)
                            .ignore();
                        let _: () = pipe.query_async(&mut conn).await?;
                        Ok(())
                    }
                })
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dlq_name_suffix() {
        assert_eq!(Registry::dlq_name("orders"), "orders:dlq");
    }

    #[test]
    fn is_dlq_name_detects_suffix() {
        assert!(Registry::is_dlq_name("orders:dlq"));
        assert!(!Registry::is_dlq_name("orders"));
    }

    #[test]
    fn consumer_group_name_derivation() {
        assert_eq!(Registry::consumer_group_name("orders"), "orders__group");
    }
}

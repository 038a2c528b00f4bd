use tracing::info;

use crate::error::LeanMqError;
use crate::message::now_ms;
use crate::registry::Registry;

const SCAN_BATCH: usize = 100;

/// Scans all registered queues, removing messages whose TTL has elapsed
/// (spec §4.E). Safe to run concurrently with producers and consumers;
/// deleting an already-deleted id is a no-op.
///
/// Scanning is group-independent (plain stream range reads): it never
/// claims a message into a consumer group's pending set, so it cannot steal
/// a "new" delivery from a real worker. Only entries past their deadline
/// are touched, and only to acknowledge (best-effort, ignored if not
/// pending) and delete them.
pub struct Sweeper {
    registry: Registry,
}

impl Sweeper {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// O(N) in total queue size across all registered queues. Returns the
    /// total count removed. Intended to be invoked periodically by the
    /// embedding application; this crate does not prescribe frequency.
    pub async fn sweep_expired(&self) -> Result<usize, LeanMqError> {
        let now = now_ms();
        let mut removed = 0usize;

        for info in self.registry.list().await? {
            let Some(queue) = self.registry.get(&info.name).await? else {
                continue;
            };

            let mut cursor = "-".to_string();
            loop {
                let batch = queue.scan_from(&cursor, SCAN_BATCH).await?;
                if batch.is_empty() {
                    break;
                }
                let last_id = batch.last().map(|m| m.id.clone());

                let expired_ids: Vec<String> = batch
                    .iter()
                    .filter(|m| matches!(m.expires_at_ms, Some(exp) if exp <= now))
                    .map(|m| m.id.clone())
                    .collect();

                if !expired_ids.is_empty() {
                    if !info.is_dlq {
                        // Best-effort: clears pending accounting for ids that
                        // happen to be claimed; ignored for ids that aren't.
                        let _ = queue.acknowledge(&expired_ids).await;
                    }
                    removed += queue.delete(&expired_ids).await?;
                }

                let exhausted = batch.len() < SCAN_BATCH;
                match last_id {
                    Some(id) => cursor = format!("({id}"),
                    None => break,
                }
                if exhausted {
                    break;
                }
            }
        }

        if removed > 0 {
            info!(removed, "expiration sweep removed messages");
            crate::metrics::record_swept(removed);
        }
        Ok(removed)
    }
}

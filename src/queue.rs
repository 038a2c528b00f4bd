use std::collections::HashMap;

use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::LeanMqError;
use crate::gateway::Gateway;
use crate::message::{encode_fields, now_ms, Message, MessageMeta, FIELD_BODY, FIELD_META};
use crate::registry::Registry;

/// Default threshold after which a claimed-but-unacknowledged message
/// becomes claimable by another consumer (spec §4.C.7).
const DEFAULT_RECLAIM_IDLE_MS: u64 = 30_000;

/// Read-only snapshot returned by [`Queue::info`] (spec §4.C.9).
#[derive(Debug, Clone)]
pub struct QueueHandleInfo {
    pub name: String,
    pub is_dlq: bool,
    pub message_count: u64,
    pub consumer_group: Option<String>,
    pub pending_count: u64,
}

/// A single stream and (for non-DLQ queues) its consumer group (spec §4.C).
#[derive(Clone)]
pub struct Queue {
    gateway: Gateway,
    name: String,
    is_dlq: bool,
    reclaim_idle_ms: u64,
}

impl Queue {
    pub(crate) fn new(gateway: Gateway, name: String, is_dlq: bool) -> Self {
        Self {
            gateway,
            name,
            is_dlq,
            reclaim_idle_ms: DEFAULT_RECLAIM_IDLE_MS,
        }
    }

    pub fn with_reclaim_idle_ms(mut self, ms: u64) -> Self {
        self.reclaim_idle_ms = ms;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_dlq(&self) -> bool {
        self.is_dlq
    }

    fn stream_key(&self) -> String {
        self.gateway.key(&self.name)
    }

    fn group_name(&self) -> String {
        Registry::consumer_group_name(&self.name)
    }

    /// The sibling this queue relocates-to (DLQ if `self` is main, main if
    /// `self` is a DLQ).
    fn paired_name(&self) -> String {
        if self.is_dlq {
            self.name
                .strip_suffix(":dlq")
                .unwrap_or(&self.name)
                .to_string()
        } else {
            Registry::dlq_name(&self.name)
        }
    }

    fn paired(&self) -> Queue {
        Queue::new(self.gateway.clone(), self.paired_name(), !self.is_dlq)
    }

    /// Creates the consumer group at the stream's beginning ("0"), so no
    /// messages published before the group existed are skipped (spec
    /// §4.B). Idempotent: `BUSYGROUP` (group already exists) is swallowed.
    pub(crate) async fn ensure_consumer_group(&self) -> Result<(), LeanMqError> {
        if self.is_dlq {
            return Ok(());
        }
        let stream_key = self.stream_key();
        let group = self.group_name();
        self.gateway
            .call(move |mut conn| {
                let stream_key = stream_key.clone();
                let group = group.clone();
                async move {
                    let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
                        .arg("CREATE")
                        .arg(&stream_key)
                        .arg(&group)
                        .arg("0")
                        .arg("MKSTREAM")
                        .query_async(&mut conn)
                        .await;
                    match result {
                        Ok(()) => Ok(()),
                        Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
                        Err(e) => Err(LeanMqError::from(e)),
                    }
                }
            })
            .await
    }

    /// Publishes `body` (spec §4.C.1). Returns the backend-assigned id.
    pub async fn publish(
        &self,
        body: HashMap<String, JsonValue>,
        ttl_seconds: Option<u64>,
    ) -> Result<String, LeanMqError> {
        let created_at_ms = now_ms();
        let expires_at_ms = ttl_seconds.map(|t| created_at_ms + (t as i64) * 1000);
        let meta = MessageMeta {
            created_at_ms,
            expires_at_ms,
            delivery_count: 0,
            error: None,
            source_queue: None,
            moved_at_ms: None,
        };
        self.publish_raw(&body, &meta).await
    }

    async fn publish_raw(
        &self,
        body: &HashMap<String, JsonValue>,
        meta: &MessageMeta,
    ) -> Result<String, LeanMqError> {
        let fields = encode_fields(body, meta)?;
        let stream_key = self.stream_key();
        let id = self
            .gateway
            .call(move |mut conn| {
                let stream_key = stream_key.clone();
                let fields = fields.clone();
                async move {
                    let id: String = redis::cmd("XADD")
                        .arg(&stream_key)
                        .arg("*")
                        .arg(&fields)
                        .query_async(&mut conn)
                        .await?;
                    Ok(id)
                }
            })
            .await?;
        crate::metrics::record_published(&self.name);
        Ok(id)
    }

    /// Claims up to `count` messages (spec §4.C.2), implicitly reclaiming
    /// pending entries stale beyond `reclaim_idle_ms` first (spec §4.C.7).
    /// DLQ queues have no consumer group; claiming from one is a plain
    /// insertion-order read, not true claim semantics.
    pub async fn claim(
        &self,
        count: usize,
        block_for_seconds: Option<u64>,
        consumer_id: Option<String>,
    ) -> Result<Vec<Message>, LeanMqError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        if self.is_dlq {
            return self.read_head(count).await;
        }

        let consumer_id =
            consumer_id.unwrap_or_else(|| format!("consumer-{}", Uuid::new_v4()));

        let mut messages = self.reclaim_stale(count, &consumer_id).await?;
        if messages.len() >= count {
            messages.truncate(count);
            crate::metrics::record_claimed(&self.name, messages.len());
            return Ok(messages);
        }
        let remaining = count - messages.len();
        let mut fresh = self
            .read_new(remaining, block_for_seconds, &consumer_id)
            .await?;
        for m in &mut fresh {
            m.delivery_count += 1;
        }
        messages.extend(fresh);
        crate::metrics::record_claimed(&self.name, messages.len());
        Ok(messages)
    }

    async fn read_head(&self, count: usize) -> Result<Vec<Message>, LeanMqError> {
        let stream_key = self.stream_key();
        let entries = self
            .gateway
            .call(move |mut conn| {
                let stream_key = stream_key.clone();
                async move {
                    let entries: StreamEntries = redis::cmd("XRANGE")
                        .arg(&stream_key)
                        .arg("-")
                        .arg("+")
                        .arg("COUNT")
                        .arg(count)
                        .query_async(&mut conn)
                        .await?;
                    Ok(entries)
                }
            })
            .await?;

        entries
            .into_iter()
            .map(|(id, fields)| Message::from_fields(id, &fields_map(fields)))
            .collect()
    }

    /// Raw, group-independent scan used by [`crate::sweeper::Sweeper`]: walks
    /// the stream from `cursor` (`"-"` for the start, or `"(id"` to resume
    /// exclusively after `id`) without touching consumer-group delivery
    /// state, so it never steals a "new" delivery from a real consumer.
    pub(crate) async fn scan_from(
        &self,
        cursor: &str,
        count: usize,
    ) -> Result<Vec<Message>, LeanMqError> {
        let stream_key = self.stream_key();
        let cursor = cursor.to_string();
        let entries: StreamEntries = self
            .gateway
            .call(move |mut conn| {
                let stream_key = stream_key.clone();
                let cursor = cursor.clone();
                async move {
                    Ok(redis::cmd("XRANGE")
                        .arg(&stream_key)
                        .arg(&cursor)
                        .arg("+")
                        .arg("COUNT")
                        .arg(count)
                        .query_async(&mut conn)
                        .await?)
                }
            })
            .await?;

        entries
            .into_iter()
            .map(|(id, fields)| Message::from_fields(id, &fields_map(fields)))
            .collect()
    }

    async fn read_new(
        &self,
        count: usize,
        block_for_seconds: Option<u64>,
        consumer_id: &str,
    ) -> Result<Vec<Message>, LeanMqError> {
        let stream_key = self.stream_key();
        let group = self.group_name();
        let consumer_id = consumer_id.to_string();
        let block_ms = block_for_seconds.unwrap_or(0) * 1000;

        let reply: StreamReadReply = self
            .gateway
            .call(move |mut conn| {
                let stream_key = stream_key.clone();
                let group = group.clone();
                let consumer_id = consumer_id.clone();
                async move {
                    let mut opts = StreamReadOptions::default()
                        .group(&group, &consumer_id)
                        .count(count);
                    if block_ms > 0 {
                        opts = opts.block(block_ms as usize);
                    }
                    let reply: StreamReadReply = conn
                        .xread_options(&[&stream_key], &[">"], &opts)
                        .await?;
                    Ok(reply)
                }
            })
            .await?;

        let mut out = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                let fields = stream_id_value_fields(&entry.map)?;
                out.push(Message::from_fields(entry.id, &fields)?);
            }
        }
        Ok(out)
    }

    async fn reclaim_stale(
        &self,
        count: usize,
        consumer_id: &str,
    ) -> Result<Vec<Message>, LeanMqError> {
        let stream_key = self.stream_key();
        let group = self.group_name();
        let consumer_id = consumer_id.to_string();
        let min_idle = self.reclaim_idle_ms;

        // XAUTOCLAIM replies [next-cursor, [[id, [field, val, ...]], ...], [deleted-ids]].
        let (_next_cursor, claimed, _deleted): (String, StreamEntries, Vec<String>) = self
            .gateway
            .call(move |mut conn| {
                let stream_key = stream_key.clone();
                let group = group.clone();
                let consumer_id = consumer_id.clone();
                async move {
                    let reply = redis::cmd("XAUTOCLAIM")
                        .arg(&stream_key)
                        .arg(&group)
                        .arg(&consumer_id)
                        .arg(min_idle)
                        .arg("0")
                        .arg("COUNT")
                        .arg(count)
                        .query_async(&mut conn)
                        .await?;
                    Ok(reply)
                }
            })
            .await?;

        claimed
            .into_iter()
            .map(|(id, fields)| {
                let mut msg = Message::from_fields(id, &fields_map(fields))?;
                msg.delivery_count += 1;
                Ok(msg)
            })
            .collect()
    }

    /// Marks `ids` delivered-and-processed (spec §4.C.3). Ids not currently
    /// pending are ignored, not errored.
    pub async fn acknowledge(&self, ids: &[String]) -> Result<usize, LeanMqError> {
        if ids.is_empty() || self.is_dlq {
            return Ok(0);
        }
        let stream_key = self.stream_key();
        let group = self.group_name();
        let ids = ids.to_vec();
        let acked: i64 = self
            .gateway
            .call(move |mut conn| {
                let stream_key = stream_key.clone();
                let group = group.clone();
                let ids = ids.clone();
                async move { Ok(conn.xack(&stream_key, &group, &ids).await?) }
            })
            .await?;
        crate::metrics::record_acknowledged(&self.name, acked.max(0) as usize);
        Ok(acked as usize)
    }

    /// Removes `ids` from the stream entirely (spec §4.C.4). Does not
    /// acknowledge pending state.
    pub async fn delete(&self, ids: &[String]) -> Result<usize, LeanMqError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let stream_key = self.stream_key();
        let ids = ids.to_vec();
        let removed: i64 = self
            .gateway
            .call(move |mut conn| {
                let stream_key = stream_key.clone();
                let ids = ids.clone();
                async move { Ok(conn.xdel(&stream_key, &ids).await?) }
            })
            .await?;
        Ok(removed as usize)
    }

    /// Reads a single entry's raw fields by exact id, or `None` if it no
    /// longer exists (used by move_to_dlq/requeue, spec §4.C.5/4.C.6).
    async fn read_one(&self, id: &str) -> Result<Option<(HashMap<String, JsonValue>, MessageMeta)>, LeanMqError> {
        let stream_key = self.stream_key();
        let id_owned = id.to_string();
        let entries: StreamEntries = self
            .gateway
            .call(move |mut conn| {
                let stream_key = stream_key.clone();
                let id = id_owned.clone();
                async move {
                    Ok(redis::cmd("XRANGE")
                        .arg(&stream_key)
                        .arg(&id)
                        .arg(&id)
                        .query_async(&mut conn)
                        .await?)
                }
            })
            .await?;

        match entries.into_iter().next() {
            Some((id, fields)) => {
                let (body, meta) = crate::message::decode_fields(&id, &fields_map(fields))?;
                Ok(Some((body, meta)))
            }
            None => Ok(None),
        }
    }

    /// Relocates `ids` to `target` (defaults to the paired DLQ), annotating
    /// each body with `_error`/`_source_queue`/`_moved_at` (spec §4.C.5).
    /// Step 1 (reading current bodies) necessarily precedes the pipeline —
    /// the backend has no "read-then-write" single command for this — but
    /// steps 2-4 (annotate, publish, ack+delete) for every surviving id are
    /// submitted as one `redis::pipe().atomic()` batch, so a crash between
    /// them can never leave a message live in both queues.
    pub async fn move_to_dlq(
        &self,
        ids: &[String],
        reason: &str,
        target: Option<&Queue>,
    ) -> Result<usize, LeanMqError> {
        let default_target;
        let target = match target {
            Some(t) => t,
            None => {
                default_target = self.paired();
                &default_target
            }
        };
        self.relocate(ids, target, Some(reason)).await
    }

    /// Inverse of [`Queue::move_to_dlq`] (spec §4.C.6): only defined on a
    /// DLQ, strips the error annotations, and publishes to `target`
    /// (defaults to the paired main queue). Same pipelined-atomicity
    /// treatment as `move_to_dlq`.
    pub async fn requeue(
        &self,
        ids: &[String],
        target: Option<&Queue>,
    ) -> Result<usize, LeanMqError> {
        if !self.is_dlq {
            return Err(LeanMqError::QueueFailure {
                queue: self.name.clone(),
                reason: "requeue is only defined on a DLQ".into(),
            });
        }
        let default_target;
        let target = match target {
            Some(t) => t,
            None => {
                default_target = self.paired();
                &default_target
            }
        };
        self.relocate(ids, target, None).await
    }

    /// Shared move-semantics for `move_to_dlq`/`requeue` (spec §4.C.5/4.C.6):
    /// read each id's body from `self`, annotate (or strip annotation) and
    /// bump `delivery_count`, then submit one atomic pipeline per batch that
    /// appends every surviving id to `target` and acknowledges (only if
    /// `self` has a consumer group) and deletes it from `self`.
    async fn relocate(
        &self,
        ids: &[String],
        target: &Queue,
        reason: Option<&str>,
    ) -> Result<usize, LeanMqError> {
        let mut annotated: Vec<Vec<(String, String)>> = Vec::new();
        let mut surviving_ids: Vec<String> = Vec::new();
        for id in ids {
            let Some((mut body, mut meta)) = self.read_one(id).await? else {
                warn!(queue = %self.name, id = %id, "skipping id already gone while relocating");
                continue;
            };
            match reason {
                Some(reason) => {
                    body.insert("_error".to_string(), JsonValue::from(reason));
                    body.insert(
                        "_source_queue".to_string(),
                        JsonValue::from(self.name.clone()),
                    );
                    let moved_at = now_ms();
                    body.insert("_moved_at".to_string(), JsonValue::from(moved_at));
                    meta.error = Some(reason.to_string());
                    meta.source_queue = Some(self.name.clone());
                    meta.moved_at_ms = Some(moved_at);
                }
                None => {
                    body.remove("_error");
                    body.remove("_source_queue");
                    body.remove("_moved_at");
                    meta.error = None;
                    meta.source_queue = None;
                    meta.moved_at_ms = None;
                }
            }
            meta.delivery_count += 1;
            annotated.push(encode_fields(&body, &meta)?);
            surviving_ids.push(id.clone());
        }
        if surviving_ids.is_empty() {
            return Ok(0);
        }

        let target_stream_key = target.stream_key();
        let source_stream_key = self.stream_key();
        let source_group = (!self.is_dlq).then(|| self.group_name());
        let moved = surviving_ids.len();

        self.gateway
            .call(move |mut conn| {
                let target_stream_key = target_stream_key.clone();
                let source_stream_key = source_stream_key.clone();
                let source_group = source_group.clone();
                let annotated = annotated.clone();
                let surviving_ids = surviving_ids.clone();
                async move {
                    let mut pipe = redis::pipe();
                    pipe.atomic();
                    for fields in &annotated {
                        pipe.cmd("XADD")
                            .arg(&target_stream_key)
                            .arg("*")
                            .arg(fields)
                            .ignore();
                    }
                    if let Some(group) = &source_group {
                        pipe.cmd("XACK")
                            .arg(&source_stream_key)
                            .arg(group)
                            .arg(&surviving_ids)
                            .ignore();
                    }
                    pipe.cmd("XDEL")
                        .arg(&source_stream_key)
                        .arg(&surviving_ids)
                        .ignore();
                    let _: () = pipe
                        .query_async(&mut conn)
                        .await
                        .map_err(LeanMqError::from)?;
                    Ok(())
                }
            })
            .await?;

        match reason {
            Some(_) => {
                crate::metrics::record_moved_to_dlq(&self.name, moved);
                debug!(queue = %self.name, target = %target.name, moved, "moved messages to DLQ");
            }
            None => crate::metrics::record_requeued(&self.name, moved),
        }
        Ok(moved)
    }

    /// Removes all messages and clears pending state (spec §4.C.8). Does
    /// not delete the queue or its consumer group.
    pub async fn purge(&self) -> Result<usize, LeanMqError> {
        let stream_key = self.stream_key();
        let len: i64 = self
            .gateway
            .call({
                let stream_key = stream_key.clone();
                move |mut conn| {
                    let stream_key = stream_key.clone();
                    async move { Ok(conn.xlen(&stream_key).await?) }
                }
            })
            .await?;

        if !self.is_dlq {
            // XGROUP SETID alone would leave stale entries in the pending
            // entries list referencing ids the trim below deletes;
            // destroying and recreating the group is the only way to
            // actually clear pending state, per spec §4.C.8.
            let group = self.group_name();
            self.gateway
                .call({
                    let stream_key = stream_key.clone();
                    let group = group.clone();
                    move |mut conn| {
                        let stream_key = stream_key.clone();
                        let group = group.clone();
                        async move {
                            let _: Result<(), redis::RedisError> = redis::cmd("XGROUP")
                                .arg("DESTROY")
                                .arg(&stream_key)
                                .arg(&group)
                                .query_async(&mut conn)
                                .await;
                            let _: () = redis::cmd("XGROUP")
                                .arg("CREATE")
                                .arg(&stream_key)
                                .arg(&group)
                                .arg("0")
                                .query_async(&mut conn)
                                .await?;
                            Ok(())
                        }
                    }
                })
                .await?;
        }

        self.gateway
            .call(move |mut conn| {
                let stream_key = stream_key.clone();
                async move {
                    let _: i64 = redis::cmd("XTRIM")
                        .arg(&stream_key)
                        .arg("MAXLEN")
                        .arg(0)
                        .query_async(&mut conn)
                        .await?;
                    Ok(())
                }
            })
            .await?;

        Ok(len.max(0) as usize)
    }

    /// Read-only snapshot (spec §4.C.9). May be stale by the time the
    /// caller reads it.
    pub async fn info(&self) -> Result<QueueHandleInfo, LeanMqError> {
        let stream_key = self.stream_key();
        let message_count: i64 = self
            .gateway
            .call({
                let stream_key = stream_key.clone();
                move |mut conn| {
                    let stream_key = stream_key.clone();
                    async move { Ok(conn.xlen(&stream_key).await?) }
                }
            })
            .await?;

        let (consumer_group, pending_count) = if self.is_dlq {
            (None, 0)
        } else {
            let group = self.group_name();
            let pending = self.pending_count().await.unwrap_or(0);
            (Some(group), pending)
        };

        Ok(QueueHandleInfo {
            name: self.name.clone(),
            is_dlq: self.is_dlq,
            message_count: message_count.max(0) as u64,
            consumer_group,
            pending_count,
        })
    }

    /// XPENDING summary form: `[count, min-id, max-id, per-consumer]`.
    async fn pending_count(&self) -> Result<u64, LeanMqError> {
        let stream_key = self.stream_key();
        let group = self.group_name();
        let count: i64 = self
            .gateway
            .call(move |mut conn| {
                let stream_key = stream_key.clone();
                let group = group.clone();
                async move {
                    let reply: (i64, Option<String>, Option<String>, Option<Vec<(String, i64)>>) =
                        redis::cmd("XPENDING")
                            .arg(&stream_key)
                            .arg(&group)
                            .query_async(&mut conn)
                            .await?;
                    Ok(reply.0)
                }
            })
            .await?;
        Ok(count.max(0) as u64)
    }
}

/// Raw `XRANGE`/`XAUTOCLAIM`-style entry list: one `(id, flat-fields)` pair
/// per stream entry, matching how `redis::cmd` deserializes these replies.
type StreamEntries = Vec<(String, Vec<(String, String)>)>;

fn fields_map(fields: Vec<(String, String)>) -> HashMap<String, String> {
    fields.into_iter().filter(|(k, _)| k == FIELD_BODY || k == FIELD_META).collect()
}

/// `xread_options` still yields the typed `StreamId` shape (`map:
/// HashMap<String, Value>`), unlike the raw-`XRANGE`/`XAUTOCLAIM` replies
/// above.
fn stream_id_value_fields(
    map: &HashMap<String, redis::Value>,
) -> Result<HashMap<String, String>, LeanMqError> {
    let mut out = HashMap::with_capacity(2);
    for key in [FIELD_BODY, FIELD_META] {
        if let Some(v) = map.get(key) {
            let s: String = redis::from_redis_value_ref(v)
                .map_err(|e| LeanMqError::Backend(e.into()))?;
            out.insert(key.to_string(), s);
        }
    }
    Ok(out)
}


use std::collections::HashMap;

use serde_json::Value as JsonValue;

use crate::error::LeanMqError;
use crate::gateway::Gateway;
use crate::message::{encode_fields, now_ms, MessageMeta};
use crate::queue::Queue;

#[derive(Clone)]
struct Intent {
    stream_key: String,
    fields: Vec<(String, String)>,
}

/// An in-memory multi-publish builder (spec §4.D / §3.5). `send` only
/// appends an intent; nothing reaches the backend until [`Transaction::commit`]
/// submits every intent in a single pipelined, backend-atomic batch.
///
/// Read operations cannot participate, and queue creation must happen
/// before the transaction is opened — both documented limitations inherent
/// to the design (spec §4.D).
pub struct Transaction {
    gateway: Gateway,
    intents: Vec<Intent>,
}

impl Transaction {
    pub(crate) fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            intents: Vec::new(),
        }
    }

    /// Appends a publish intent. Does not touch the backend.
    pub fn send(
        &mut self,
        queue: &Queue,
        body: HashMap<String, JsonValue>,
        ttl_seconds: Option<u64>,
    ) -> Result<(), LeanMqError> {
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
        let fields = encode_fields(&body, &meta)?;
        self.intents.push(Intent {
            stream_key: self.gateway.key(queue.name()),
            fields,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.intents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    /// Submits every accumulated intent in one pipelined batch the backend
    /// executes atomically. On failure, raises [`LeanMqError::TransactionFailure`]
    /// and nothing is externally visible; partial effects are impossible by
    /// construction (one pipeline, one round-trip).
    pub async fn commit(self) -> Result<Vec<String>, LeanMqError> {
        if self.intents.is_empty() {
            return Ok(Vec::new());
        }
        let intents = self.intents;
        self.gateway
            .call(move |mut conn| {
                let intents = intents.clone();
                async move {
                    let mut pipe = redis::pipe();
                    pipe.atomic();
                    for intent in &intents {
                        pipe.cmd("XADD")
                            .arg(&intent.stream_key)
                            .arg("*")
                            .arg(&intent.fields);
                    }
                    let ids: Vec<String> = pipe
                        .query_async(&mut conn)
                        .await
                        .map_err(|e| LeanMqError::TransactionFailure(e.to_string()))?;
                    Ok(ids)
                }
            })
            .await
    }
}


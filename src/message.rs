use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LeanMqError;

/// A message as returned to callers (spec §3.2).
///
/// `id` is the backend-assigned stream id (`{ms}-{seq}`), immutable and
/// unique within the queue it was read from. `body` is the user-supplied
/// mapping, opaque to the queue runtime beyond being serializable JSON
/// (spec §9's "Dynamic mapping payloads" re-architecture note).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub body: HashMap<String, Value>,
    pub created_at_ms: i64,
    pub expires_at_ms: Option<i64>,
    pub delivery_count: u64,
}

/// Internal metadata header stored alongside a message's body, per spec
/// §6.3's wire field list.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub(crate) struct MessageMeta {
    pub created_at_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<i64>,
    #[serde(default)]
    pub delivery_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_queue: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moved_at_ms: Option<i64>,
}

/// The two stream fields LeanMQ writes per entry: the serialized body under
/// `body` and the serialized [`MessageMeta`] under `_meta`. Kept to two
/// fields (rather than one field per header key) so a single `HGETALL`-style
/// read on a stream entry is always exactly two fields, regardless of how
/// many headers are present.
pub(crate) const FIELD_BODY: &str = "body";
pub(crate) const FIELD_META: &str = "_meta";

pub(crate) fn encode_fields(
    body: &HashMap<String, Value>,
    meta: &MessageMeta,
) -> Result<Vec<(String, String)>, LeanMqError> {
    Ok(vec![
        (FIELD_BODY.to_string(), serde_json::to_string(body)?),
        (FIELD_META.to_string(), serde_json::to_string(meta)?),
    ])
}

pub(crate) fn decode_fields(
    id: &str,
    fields: &HashMap<String, String>,
) -> Result<(HashMap<String, Value>, MessageMeta), LeanMqError> {
    let body: HashMap<String, Value> = match fields.get(FIELD_BODY) {
        Some(raw) => serde_json::from_str(raw)?,
        None => HashMap::new(),
    };
    let meta: MessageMeta = match fields.get(FIELD_META) {
        Some(raw) => serde_json::from_str(raw)?,
        None => MessageMeta::default(),
    };
    let _ = id;
    Ok((body, meta))
}

impl Message {
    pub(crate) fn from_fields(
        id: String,
        fields: &HashMap<String, String>,
    ) -> Result<Self, LeanMqError> {
        let (body, meta) = decode_fields(&id, fields)?;
        Ok(Self {
            id,
            body,
            created_at_ms: meta.created_at_ms,
            expires_at_ms: meta.expires_at_ms,
            delivery_count: meta.delivery_count,
        })
    }

    /// `_error` annotation as attached by `move_to_dlq` (spec §4.C.5),
    /// `None` for a message that has never been relocated.
    pub fn error_reason(&self) -> Option<&str> {
        self.body.get("_error").and_then(Value::as_str)
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_body_and_meta() {
        let mut body = HashMap::new();
        body.insert("x".to_string(), Value::from(1));
        let meta = MessageMeta {
            created_at_ms: 1000,
            expires_at_ms: Some(2000),
            delivery_count: 3,
            error: None,
            source_queue: None,
            moved_at_ms: None,
        };
        let fields = encode_fields(&body, &meta).unwrap();
        let map: HashMap<String, String> = fields.into_iter().collect();
        let msg = Message::from_fields("1-0".to_string(), &map).unwrap();
        assert_eq!(msg.id, "1-0");
        assert_eq!(msg.created_at_ms, 1000);
        assert_eq!(msg.expires_at_ms, Some(2000));
        assert_eq!(msg.delivery_count, 3);
        assert_eq!(msg.body.get("x").unwrap(), &Value::from(1));
    }

    #[test]
    fn missing_fields_default_gracefully() {
        let map: HashMap<String, String> = HashMap::new();
        let msg = Message::from_fields("2-0".to_string(), &map).unwrap();
        assert!(msg.body.is_empty());
        assert_eq!(msg.delivery_count, 0);
        assert!(msg.expires_at_ms.is_none());
    }

    #[test]
    fn error_reason_reads_body_field() {
        let mut body = HashMap::new();
        body.insert("_error".to_string(), Value::from("boom"));
        let msg = Message {
            id: "1-0".into(),
            body,
            created_at_ms: 0,
            expires_at_ms: None,
            delivery_count: 1,
        };
        assert_eq!(msg.error_reason(), Some("boom"));
    }
}

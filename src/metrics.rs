//! Observability hooks, not integrations: LeanMQ emits through the `metrics`
//! facade only. An embedding application installs whatever recorder it
//! wants (Prometheus, statsd, none); this crate never constructs an
//! exporter or binds a port.

use metrics::counter;

pub mod names {
    pub const MESSAGES_PUBLISHED: &str = "leanmq_messages_published_total";
    pub const MESSAGES_CLAIMED: &str = "leanmq_messages_claimed_total";
    pub const MESSAGES_ACKNOWLEDGED: &str = "leanmq_messages_acknowledged_total";
    pub const MESSAGES_MOVED_TO_DLQ: &str = "leanmq_messages_moved_to_dlq_total";
    pub const MESSAGES_REQUEUED: &str = "leanmq_messages_requeued_total";
    pub const MESSAGES_SWEPT: &str = "leanmq_messages_swept_total";
    pub const GATEWAY_RETRIES: &str = "leanmq_gateway_retries_total";
}

pub fn record_published(queue: &str) {
    counter!(names::MESSAGES_PUBLISHED, "queue" => queue.to_string()).increment(1);
}

pub fn record_claimed(queue: &str, count: usize) {
    counter!(names::MESSAGES_CLAIMED, "queue" => queue.to_string()).increment(count as u64);
}

pub fn record_acknowledged(queue: &str, count: usize) {
    counter!(names::MESSAGES_ACKNOWLEDGED, "queue" => queue.to_string()).increment(count as u64);
}

pub fn record_moved_to_dlq(queue: &str, count: usize) {
    counter!(names::MESSAGES_MOVED_TO_DLQ, "queue" => queue.to_string()).increment(count as u64);
}

pub fn record_requeued(queue: &str, count: usize) {
    counter!(names::MESSAGES_REQUEUED, "queue" => queue.to_string()).increment(count as u64);
}

pub fn record_swept(count: usize) {
    counter!(names::MESSAGES_SWEPT).increment(count as u64);
}

pub fn record_gateway_retry() {
    counter!(names::GATEWAY_RETRIES).increment(1);
}

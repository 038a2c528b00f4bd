//! LeanMQ is a reliable message-queue library layered on a
//! Redis-Streams-compatible backend. It replaces fragile internal HTTP
//! webhooks between cooperating services with durable, at-least-once
//! message delivery that preserves a webhook-shaped developer experience:
//! path-routed handlers and path-addressed sends.
//!
//! The core pieces: a [`gateway::Gateway`] hands out retried, pooled
//! backend connections; a [`registry::Registry`] tracks known queue pairs;
//! [`queue::Queue`] is the publish/claim/ack/DLQ handle for a single
//! stream; [`transaction::Transaction`] batches multiple publishes
//! atomically; [`sweeper::Sweeper`] reclaims TTL-expired messages;
//! [`router::Router`] and [`dispatcher::Dispatcher`] together form the
//! path-routed "webhook" façade, driven to completion by a
//! [`supervisor::Supervisor`] with graceful shutdown. [`service::QueueService`]
//! wires all of the above into a single entry point.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod message;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod router;
pub mod service;
pub mod supervisor;
pub mod sweeper;
pub mod transaction;

pub use config::{GatewayConfig, ServiceConfig};
pub use dispatcher::Dispatcher;
pub use error::{ConfigError, ErrorCategory, LeanMqError, RetryStrategy};
pub use gateway::Gateway;
pub use message::Message;
pub use queue::{Queue, QueueHandleInfo};
pub use registry::{QueueInfo, Registry};
pub use router::{Handler, Router};
pub use service::QueueService;
pub use supervisor::{Supervisor, SupervisorState};
pub use sweeper::Sweeper;
pub use transaction::Transaction;

/// Convenience alias for fallible LeanMQ operations.
pub type LeanMqResult<T> = Result<T, LeanMqError>;

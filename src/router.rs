use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::LeanMqError;
use crate::queue::Queue;

/// Invoked by the Dispatcher for a message claimed on a registered route.
/// Mirrors a webhook handler: `path → queue_name → handler(body)`. Handler
/// errors never propagate out of the Dispatcher loop (spec §5's failure
/// discipline); they move the message to the route's DLQ instead.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, body: HashMap<String, Value>) -> Result<(), String>;
}

pub(crate) struct Route {
    path: String,
    queue_name: String,
    handler: Arc<dyn Handler>,
    queue: Queue,
    dlq: Queue,
}

/// Bidirectional map between a handler path and a queue name, plus the
/// handler table the Dispatcher invokes against (spec §4.F).
///
/// Path normalization (spec §3.4): must start with `/`; internal
/// separators become `_`; leading/trailing separators are stripped; the
/// result must be non-empty. Registering the same path twice replaces the
/// handler, not the queue pairing.
pub struct Router {
    routes: Vec<Route>,
    by_path: HashMap<String, usize>,
    by_queue: HashMap<String, usize>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            by_path: HashMap::new(),
            by_queue: HashMap::new(),
        }
    }

    /// Deterministically derives a queue name from a path (spec §3.4).
    /// Returns `None` if the normalized result would be empty.
    pub fn normalize_path(path: &str) -> Option<String> {
        if !path.starts_with('/') {
            return None;
        }
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return None;
        }
        Some(trimmed.replace('/', "_"))
    }

    /// Registers `handler` for `path`, pairing it with `queue`/`dlq` (both
    /// already created via [`crate::registry::Registry::create_pair`]
    /// keyed by the path's normalized queue name). Replaces any prior
    /// handler for the same path.
    pub fn register(
        &mut self,
        path: &str,
        queue: Queue,
        dlq: Queue,
        handler: Arc<dyn Handler>,
    ) -> Result<(), LeanMqError> {
        let queue_name = Self::normalize_path(path).ok_or_else(|| LeanMqError::QueueFailure {
            queue: path.to_string(),
            reason: "path must start with '/' and normalize to a non-empty queue name".into(),
        })?;

        let route = Route {
            path: path.to_string(),
            queue_name: queue_name.clone(),
            handler,
            queue,
            dlq,
        };

        if let Some(&idx) = self.by_path.get(path) {
            self.by_queue.remove(&self.routes[idx].queue_name);
            self.routes[idx] = route;
            self.by_queue.insert(queue_name, idx);
        } else {
            let idx = self.routes.len();
            self.by_path.insert(path.to_string(), idx);
            self.by_queue.insert(queue_name, idx);
            self.routes.push(route);
        }
        Ok(())
    }

    pub fn queue_name_for_path(&self, path: &str) -> Option<&str> {
        self.by_path
            .get(path)
            .map(|&idx| self.routes[idx].queue_name.as_str())
    }

    pub fn path_for_queue_name(&self, queue_name: &str) -> Option<&str> {
        self.by_queue
            .get(queue_name)
            .map(|&idx| self.routes[idx].path.as_str())
    }

    pub fn queue_for_path(&self, path: &str) -> Option<&Queue> {
        self.by_path.get(path).map(|&idx| &self.routes[idx].queue)
    }

    /// Publishes `body` to the queue registered for `path` (spec §6.4): the
    /// producer-side counterpart of `register` — addresses a send by path
    /// instead of requiring the caller to hold a `Queue` handle directly.
    /// Fails with `QueueFailure` if no route is registered for `path`.
    pub async fn publish(
        &self,
        path: &str,
        body: HashMap<String, Value>,
        ttl_seconds: Option<u64>,
    ) -> Result<String, LeanMqError> {
        let queue = self.queue_for_path(path).ok_or_else(|| LeanMqError::QueueFailure {
            queue: path.to_string(),
            reason: "no route registered for this path".into(),
        })?;
        queue.publish(body, ttl_seconds).await
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Route {
    pub(crate) fn queue(&self) -> &Queue {
        &self.queue
    }

    pub(crate) fn dlq(&self) -> &Queue {
        &self.dlq
    }

    pub(crate) fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_simple_path() {
        assert_eq!(Router::normalize_path("/orders").as_deref(), Some("orders"));
    }

    #[test]
    fn normalizes_nested_path() {
        assert_eq!(
            Router::normalize_path("/o/s/").as_deref(),
            Some("o_s")
        );
    }

    #[test]
    fn rejects_path_without_leading_slash() {
        assert_eq!(Router::normalize_path("orders"), None);
    }

    #[test]
    fn rejects_path_that_normalizes_to_empty() {
        assert_eq!(Router::normalize_path("/"), None);
        assert_eq!(Router::normalize_path("//"), None);
    }

    #[test]
    fn strips_leading_and_trailing_separators() {
        assert_eq!(
            Router::normalize_path("//a/b//"),
            Some("a_b".to_string())
        );
    }
}

use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, warn};

use crate::router::Router;

/// Default number of messages claimed per route per iteration (spec §6.5's
/// `batch_size`, here given a concrete default matching the Gateway's
/// retry-interval-free fast path).
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Consumes from every routed queue, invokes the matching handler, and
/// acknowledges on success or relocates to the route's DLQ on failure
/// (spec §4.G). Owns no lifecycle state itself — the [`crate::supervisor::Supervisor`]
/// is what repeatedly drives [`Dispatcher::process_once`].
pub struct Dispatcher<'a> {
    router: &'a Router,
}

impl<'a> Dispatcher<'a> {
    pub fn new(router: &'a Router) -> Self {
        Self { router }
    }

    /// One iteration of the dispatcher loop (spec §4.G). Routes are visited
    /// in registration order; only the first route that finds its queue
    /// empty blocks (for `block_for_seconds`), subsequent routes in the same
    /// iteration claim non-blocking, matching spec's "the first route that
    /// blocks does so; subsequent routes claim non-blocking" rule. Returns
    /// the total number of messages processed.
    pub async fn process_once(
        &self,
        batch_size: usize,
        block_for_seconds: Option<u64>,
    ) -> usize {
        let mut processed = 0usize;
        let mut has_blocked = false;

        for route in self.router.iter() {
            let block = if has_blocked { None } else { block_for_seconds };

            let claimed = match route.queue().claim(batch_size, block, None).await {
                Ok(msgs) => msgs,
                Err(err) => {
                    warn!(path = route.path(), error = %err, "dispatcher route read failed, continuing");
                    continue;
                }
            };

            if block.is_some() {
                has_blocked = true;
            }
            if claimed.is_empty() {
                continue;
            }

            for message in claimed {
                let start = Instant::now();
                let id = message.id.clone();
                match route.handler().handle(message.body).await {
                    Ok(()) => {
                        if let Err(err) = route.queue().acknowledge(&[id.clone()]).await {
                            warn!(path = route.path(), id = %id, error = %err, "ack failed after successful handler");
                        }
                        counter!("leanmq_dispatch_success_total", "path" => route.path().to_string()).increment(1);
                    }
                    Err(reason) => {
                        if let Err(err) = route
                            .queue()
                            .move_to_dlq(&[id.clone()], &reason, Some(route.dlq()))
                            .await
                        {
                            warn!(path = route.path(), id = %id, error = %err, "failed to move failed message to DLQ");
                        }
                        counter!("leanmq_dispatch_failure_total", "path" => route.path().to_string()).increment(1);
                    }
                }
                histogram!("leanmq_dispatch_duration_seconds", "path" => route.path().to_string())
                    .record(start.elapsed().as_secs_f64());
                processed += 1;
            }
        }

        debug!(processed, "dispatcher iteration complete");
        processed
    }
}

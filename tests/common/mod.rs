use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::redis::Redis;

use leanmq::{GatewayConfig, QueueService};

/// Spins up a throwaway Redis container and returns a connected
/// [`QueueService`] against it, plus the container handle (drop it last —
/// dropping the container stops it).
pub async fn spawn_service(prefix: &str) -> (ContainerAsync<Redis>, QueueService) {
    let container = Redis::default()
        .start()
        .await
        .expect("failed to start redis container");
    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("failed to resolve mapped redis port");

    let config = GatewayConfig::new("127.0.0.1", port).with_prefix(prefix.to_string());
    let service = QueueService::connect(config)
        .await
        .expect("failed to connect to containerized redis");

    (container, service)
}

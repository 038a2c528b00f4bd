use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::ServiceConfig;
use crate::dispatcher::Dispatcher;
use crate::error::LeanMqError;
use crate::router::Router;

/// Lifecycle states of a [`Supervisor`] (spec §4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    New,
    Running,
    Stopping,
    Stopped,
}

/// Owns the Dispatcher's worker task and its lifecycle (spec §4.H). One
/// cooperative worker per Supervisor; `stop()` is checked at iteration
/// boundaries, not inside a blocking claim (spec §5) — keep
/// `block_for_seconds` small for responsive shutdown.
pub struct Supervisor {
    router: Arc<Router>,
    config: ServiceConfig,
    state: Arc<RwLock<SupervisorState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    worker: Option<JoinHandle<()>>,
    signal_task: Option<JoinHandle<()>>,
}

impl Supervisor {
    pub fn new(router: Router, config: ServiceConfig) -> Self {
        Self {
            router: Arc::new(router),
            config,
            state: Arc::new(RwLock::new(SupervisorState::New)),
            shutdown_tx: None,
            worker: None,
            signal_task: None,
        }
    }

    pub async fn state(&self) -> SupervisorState {
        *self.state.read().await
    }

    /// `NEW` → `RUNNING`. A no-op on a non-`NEW` supervisor (spec §4.H's
    /// re-entry rule).
    pub async fn start(&mut self) -> Result<(), LeanMqError> {
        {
            let mut state = self.state.write().await;
            if *state != SupervisorState::New {
                return Ok(());
            }
            *state = SupervisorState::Running;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = {
            let router = self.router.clone();
            let state = self.state.clone();
            let batch_size = self.config.batch_size;
            let block_for_seconds = self.config.block_for_seconds;
            let process_interval = Duration::from_secs(self.config.process_interval_secs);
            let mut shutdown_rx = shutdown_rx.clone();

            tokio::spawn(async move {
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }

                    let dispatcher = Dispatcher::new(&router);
                    dispatcher.process_once(batch_size, block_for_seconds).await;

                    tokio::select! {
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(process_interval) => {}
                    }
                }
                *state.write().await = SupervisorState::Stopped;
                info!("dispatcher worker stopped");
            })
        };
        self.worker = Some(worker);

        if self.config.install_signals {
            let shutdown_tx_for_signal = shutdown_tx.clone();
            self.signal_task = Some(tokio::spawn(async move {
                wait_for_shutdown_signal().await;
                info!("shutdown signal received");
                let _ = shutdown_tx_for_signal.send(true);
            }));
        }

        self.shutdown_tx = Some(shutdown_tx);
        info!("supervisor started");
        Ok(())
    }

    /// `RUNNING` → `STOPPING` → `STOPPED`. A no-op on a non-`RUNNING`
    /// supervisor. Signals the worker to exit at the next iteration
    /// boundary and waits up to `worker_thread_timeout` seconds; after
    /// that, returns regardless — the worker is cooperative, never
    /// force-killed (spec §4.H).
    pub async fn stop(&mut self) -> Result<(), LeanMqError> {
        {
            let mut state = self.state.write().await;
            if *state != SupervisorState::Running {
                return Ok(());
            }
            *state = SupervisorState::Stopping;
        }

        if let Some(tx) = &self.shutdown_tx {
            let _ = tx.send(true);
        }

        if let Some(signal_task) = self.signal_task.take() {
            signal_task.abort();
        }

        if let Some(worker) = self.worker.take() {
            let timeout = Duration::from_secs(self.config.worker_thread_timeout_secs);
            let _ = tokio::time::timeout(timeout, worker).await;
        }

        // The worker sets `Stopped` itself right before exiting; if the
        // timeout elapsed first, reflect that stop() gave up waiting without
        // claiming a clean shutdown actually happened.
        let mut state = self.state.write().await;
        if *state == SupervisorState::Stopping {
            *state = SupervisorState::Stopped;
        }
        info!("supervisor stopped");
        Ok(())
    }

    /// Whether the worker exists and has not exited.
    pub async fn is_alive(&self) -> bool {
        matches!(
            self.state().await,
            SupervisorState::Running | SupervisorState::Stopping
        )
    }
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(_) => std::future::pending::<()>().await,
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await;
}

async fn wait_for_shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = terminate_signal() => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starting_and_stopping_an_empty_router_is_a_no_op() {
        let router = Router::new();
        let config = ServiceConfig {
            install_signals: false,
            process_interval_secs: 1,
            ..ServiceConfig::default()
        };
        let mut supervisor = Supervisor::new(router, config);
        assert_eq!(supervisor.state().await, SupervisorState::New);

        supervisor.start().await.unwrap();
        assert_eq!(supervisor.state().await, SupervisorState::Running);
        assert!(supervisor.is_alive().await);

        supervisor.stop().await.unwrap();
        assert_eq!(supervisor.state().await, SupervisorState::Stopped);
        assert!(!supervisor.is_alive().await);
    }

    #[tokio::test]
    async fn start_is_a_no_op_when_not_new() {
        let router = Router::new();
        let config = ServiceConfig {
            install_signals: false,
            ..ServiceConfig::default()
        };
        let mut supervisor = Supervisor::new(router, config);
        supervisor.start().await.unwrap();
        // Second start() is a no-op: state stays Running, no panic, no
        // double-spawn.
        supervisor.start().await.unwrap();
        assert_eq!(supervisor.state().await, SupervisorState::Running);
        supervisor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_is_a_no_op_when_not_running() {
        let router = Router::new();
        let config = ServiceConfig::default();
        let mut supervisor = Supervisor::new(router, config);
        supervisor.stop().await.unwrap();
        assert_eq!(supervisor.state().await, SupervisorState::New);
    }
}

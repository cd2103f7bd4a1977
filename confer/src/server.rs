use std::time::Duration;

use anyhow::Result;
use confer_broker::Broker;
use confer_coordinator::{Coordinator, CoordinatorHandle};
use confer_core::Config;
use confer_gateway::SignalingGateway;
use confer_sfu::{MediaWorker, WorkerHandle};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Every component of one control-plane node, wired to a shared broker
pub struct ConferServer {
    broker: Broker,
    worker: MediaWorker,
    coordinator: Coordinator,
    gateway: SignalingGateway,
    worker_handle: Option<WorkerHandle>,
    coordinator_handle: Option<CoordinatorHandle>,
    cancel_token: CancellationToken,
}

impl ConferServer {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let broker = Broker::new();
        Self {
            worker: MediaWorker::new(broker.clone(), config.sfu.clone()),
            coordinator: Coordinator::new(broker.clone(), config.coordinator.clone()),
            gateway: SignalingGateway::new(broker.clone(), config.gateway.clone()),
            broker,
            worker_handle: None,
            coordinator_handle: None,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Register the worker and coordinator queues and run until a shutdown signal
    pub async fn run(mut self) -> Result<()> {
        let worker_handle = self.worker.start()?;
        info!(queues = ?worker_handle.queues(), "Media worker serving");
        self.worker_handle = Some(worker_handle);

        let coordinator_handle = self.coordinator.start()?;
        info!(queues = ?coordinator_handle.queues(), "Coordinator serving");
        self.coordinator_handle = Some(coordinator_handle);

        let stats_task = self.spawn_stats_reporter();
        info!("Confer control plane ready");

        shutdown_signal().await;
        info!("Shutdown signal received, starting graceful shutdown...");

        self.cancel_token.cancel();
        if let Err(e) = stats_task.await {
            error!(error = %e, "Stats reporter ended abnormally");
        }
        self.shutdown();
        Ok(())
    }

    fn spawn_stats_reporter(&self) -> JoinHandle<()> {
        let cancel_token = self.cancel_token.clone();
        let broker = self.broker.clone();
        let worker = self.worker.clone();
        let coordinator = self.coordinator.clone();
        let gateway = self.gateway.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STATS_INTERVAL);
            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => {
                        debug!("Stats reporter shutting down");
                        return;
                    }
                    _ = ticker.tick() => {
                        let registry = coordinator.stats();
                        let worker_stats = worker.stats();
                        let gateway_stats = gateway.stats();
                        info!(
                            spaces = registry.spaces,
                            members = registry.members,
                            live_transports = registry.live_transports,
                            closing_transports = registry.closing_transports,
                            active_space_tasks = coordinator.active_spaces(),
                            worker_routers = worker_stats.routers,
                            worker_ports_in_use = worker_stats.ports_in_use,
                            gateway_connections = gateway_stats.connections,
                            "Control plane statistics"
                        );
                        for queue in broker.queue_stats() {
                            debug!(
                                stats = %serde_json::to_string(&queue).unwrap_or_default(),
                                "Queue statistics"
                            );
                        }
                    }
                }
            }
        })
    }

    /// Drop consumer registrations, coordinator first so no new work reaches the worker
    fn shutdown(&mut self) {
        if let Some(handle) = self.coordinator_handle.take() {
            drop(handle);
            info!("Coordinator stopped");
        }
        if let Some(handle) = self.worker_handle.take() {
            drop(handle);
            info!("Media worker stopped");
        }
        info!("Shutdown complete");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}

//! Process-wide lifecycle: builds the pool, starts the selected
//! processors, waits for a shutdown signal, then drains in order.
//!
//! The shutdown signal/flag shape is grounded on the teacher's
//! `watch::Receiver<bool>` passed into `NatsWorker::run`, generalized from
//! one worker's receiver to an engine-wide flag both processors poll.

use std::sync::Arc;

use cosmo_core::Registry;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::broker::BrokerClient;
use crate::error::BrokerError;
use crate::health::{HealthServer, HealthState};
use crate::job_processor::JobProcessor;
use crate::metrics;
use crate::pool::BoundedPool;
use crate::publisher::Publisher;
use crate::settings::WorkerSettings;
use crate::stream_processor::StreamProcessor;

/// Which processors `Engine::run` starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorSelection {
    Jobs,
    Streams,
    Both,
}

/// Singleton lifecycle: pool, signal handling, processor startup, drained
/// shutdown.
pub struct Engine {
    pool: Arc<BoundedPool>,
    registry: Arc<Registry>,
    broker: BrokerClient,
    publisher: Arc<Publisher>,
    settings: WorkerSettings,
    health: HealthState,
    selection: ProcessorSelection,
}

impl Engine {
    pub fn new(
        broker: BrokerClient,
        registry: Arc<Registry>,
        publisher: Arc<Publisher>,
        settings: WorkerSettings,
        concurrency: usize,
        selection: ProcessorSelection,
    ) -> Self {
        Self {
            pool: Arc::new(BoundedPool::new(concurrency.max(1))),
            registry,
            broker,
            publisher,
            settings,
            health: HealthState::new(),
            selection,
        }
    }

    pub fn health_state(&self) -> HealthState {
        self.health.clone()
    }

    /// Runs the engine to completion: starts the health server and the
    /// selected processors, blocks until SIGINT/SIGTERM, then shuts down
    /// in order — stop new fetches, reject in-flight pool submissions,
    /// drain running handlers with a deadline.
    pub async fn run(&self) -> Result<(), BrokerError> {
        let (running_tx, running_rx) = watch::channel(true);

        let metrics_handle = metrics::init_metrics();
        let health_server = HealthServer::new(self.settings.health_port, self.health.clone())
            .with_metrics(metrics_handle);
        tokio::spawn(async move {
            if let Err(err) = health_server.run().await {
                error!(error = %err, "health server exited");
            }
        });

        let job_processor = JobProcessor::new(
            self.broker.clone(),
            self.pool.clone(),
            self.registry.clone(),
            self.publisher.clone(),
            self.settings.jobs_fetch_timeout,
            self.settings.jobs_scheduler_fetch_timeout,
        );
        let stream_processor = StreamProcessor::new(
            self.broker.clone(),
            self.pool.clone(),
            self.registry.clone(),
            self.settings.streams_fetch_timeout,
        );

        let mut handles = Vec::new();

        if matches!(self.selection, ProcessorSelection::Jobs | ProcessorSelection::Both) {
            let rx1 = running_rx.clone();
            let rx2 = running_rx.clone();
            let jp1 = job_processor;
            handles.push(tokio::spawn(async move {
                if let Err(err) = jp1.run_work_loop(rx1).await {
                    error!(error = %err, "job work loop exited with error");
                }
            }));
            let jp2 = JobProcessor::new(
                self.broker.clone(),
                self.pool.clone(),
                self.registry.clone(),
                self.publisher.clone(),
                self.settings.jobs_fetch_timeout,
                self.settings.jobs_scheduler_fetch_timeout,
            );
            handles.push(tokio::spawn(async move {
                if let Err(err) = jp2.run_scheduler_loop(rx2).await {
                    error!(error = %err, "scheduler loop exited with error");
                }
            }));
        }

        if matches!(self.selection, ProcessorSelection::Streams | ProcessorSelection::Both) {
            let rx = running_rx.clone();
            handles.push(tokio::spawn(async move {
                if let Err(err) = stream_processor.run(rx).await {
                    error!(error = %err, "stream processor exited with error");
                }
            }));
        }

        wait_for_shutdown_signal().await;
        info!("shutdown signal received");

        let _ = running_tx.send(false);
        self.pool.shutdown();

        let drained = self
            .pool
            .wait_for_termination(self.settings.shutdown_timeout)
            .await;
        if !drained {
            warn!("shutdown deadline exceeded, abandoning in-flight handlers");
        }

        for handle in handles {
            handle.abort();
        }

        Ok(())
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

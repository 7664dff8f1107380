//! Tokio task runtime for a [`StageSystem`].
//!
//! Same four workers as the threaded runtime, one task each. Hardware
//! sequencing, port enumeration and control ticks (which may write to a
//! serial port) run on the blocking pool so they never stall the reactor.
//! Shutdown is a `watch` flag: every task finishes its current tick, the
//! handles are awaited, and only then is the hardware closed.

use std::sync::Arc;

use common::hardware::PortLister;
use common::{StageError, StageResult, StageSystem};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

mod connect;
mod control;
mod discovery;
mod logger;

pub use connect::ConnectionRequest;

const REQUEST_QUEUE: usize = 16;

pub struct AsyncStageRuntime {
    system: Arc<StageSystem>,
    shutdown: watch::Sender<bool>,
    requests: Option<mpsc::Sender<ConnectionRequest>>,
    workers: Vec<(&'static str, JoinHandle<()>)>,
}

impl AsyncStageRuntime {
    /// Spawn the workers on the current tokio runtime.
    pub fn start(system: Arc<StageSystem>, lister: Box<dyn PortLister>) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (requests, request_rx) = mpsc::channel(REQUEST_QUEUE);
        let control_period = system.config().control_period();
        let discovery_period = system.config().discovery_period();

        let workers = vec![
            (
                "control",
                tokio::spawn(control::run_control_loop(
                    Arc::clone(system.engine()),
                    control_period,
                    shutdown_rx.clone(),
                )),
            ),
            (
                "logger",
                tokio::spawn(logger::run_logger_loop(
                    Arc::clone(system.logger()),
                    shutdown_rx.clone(),
                )),
            ),
            (
                "discovery",
                tokio::spawn(discovery::run_discovery_loop(
                    lister,
                    Arc::clone(system.ports()),
                    discovery_period,
                    shutdown_rx.clone(),
                )),
            ),
            (
                "connect",
                tokio::spawn(connect::run_connect_worker(
                    Arc::clone(&system),
                    request_rx,
                    shutdown_rx,
                )),
            ),
        ];

        info!(workers = workers.len(), "async runtime started");
        Self {
            system,
            shutdown,
            requests: Some(requests),
            workers,
        }
    }

    pub fn system(&self) -> &Arc<StageSystem> {
        &self.system
    }

    async fn submit(
        &self,
        build: impl FnOnce(oneshot::Sender<StageResult<()>>) -> ConnectionRequest,
    ) -> StageResult<()> {
        let requests = self.requests.as_ref().ok_or(StageError::WorkerStopped)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        requests
            .send(build(reply_tx))
            .await
            .map_err(|_| StageError::WorkerStopped)?;
        reply_rx.await.unwrap_or(Err(StageError::WorkerStopped))
    }

    pub async fn connect(&self, port: Option<String>) -> StageResult<()> {
        self.submit(|reply| ConnectionRequest::Connect { port, reply })
            .await
    }

    pub async fn disconnect(&self) -> StageResult<()> {
        self.submit(|reply| ConnectionRequest::Disconnect { reply })
            .await
    }

    /// Write every series to disk off the reactor.
    pub async fn save(&self) -> StageResult<Vec<std::path::PathBuf>> {
        let system = Arc::clone(&self.system);
        tokio::task::spawn_blocking(move || system.save())
            .await
            .map_err(|_| StageError::WorkerStopped)?
    }

    /// Stop every worker after its current tick, then close the hardware.
    pub async fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        let _ = self.shutdown.send(true);
        self.requests = None;
        for (name, handle) in self.workers.drain(..) {
            if let Err(err) = handle.await {
                warn!(worker = name, %err, "worker failed");
            }
        }
        let system = Arc::clone(&self.system);
        if tokio::task::spawn_blocking(move || system.disconnect())
            .await
            .is_err()
        {
            warn!("disconnect on shutdown failed");
        }
        info!("async runtime stopped");
    }
}

impl Drop for AsyncStageRuntime {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            // Without an await point the best we can do is stop the loops.
            let _ = self.shutdown.send(true);
            for (_, handle) in &self.workers {
                handle.abort();
            }
            self.system.disconnect();
        }
    }
}

//! Thread-per-worker runtime for a [`StageSystem`].
//!
//! Four workers run side by side: the control loop, the logger loop, port
//! discovery, and connect/disconnect sequencing. They share nothing but the
//! system's components and a shutdown flag. Shutdown lets every worker finish
//! its current tick, joins them, and only then closes the hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use common::hardware::PortLister;
use common::{StageError, StageResult, StageSystem};
use tracing::{info, warn};

mod connect;
mod control;
mod discovery;
mod logger;

pub use connect::ConnectionRequest;

/// Longest single sleep, so a stop request is noticed promptly even with a
/// long logging interval.
const SLEEP_SLICE: Duration = Duration::from_millis(20);

/// Sleep until `deadline` unless `shutdown` is raised first.
pub(crate) fn sleep_until(deadline: Instant, shutdown: &AtomicBool) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

pub struct StageRuntime {
    system: Arc<StageSystem>,
    shutdown: Arc<AtomicBool>,
    requests: Option<Sender<ConnectionRequest>>,
    workers: Vec<(&'static str, JoinHandle<()>)>,
}

impl StageRuntime {
    pub fn start(system: Arc<StageSystem>, lister: Box<dyn PortLister>) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let (requests, request_rx) = mpsc::channel();
        let control_period = system.config().control_period();
        let discovery_period = system.config().discovery_period();

        let workers = vec![
            (
                "control",
                thread::spawn({
                    let engine = Arc::clone(system.engine());
                    let shutdown = Arc::clone(&shutdown);
                    move || control::run_control_loop(engine, control_period, shutdown)
                }),
            ),
            (
                "logger",
                thread::spawn({
                    let logger = Arc::clone(system.logger());
                    let shutdown = Arc::clone(&shutdown);
                    move || logger::run_logger_loop(logger, shutdown)
                }),
            ),
            (
                "discovery",
                thread::spawn({
                    let ports = Arc::clone(system.ports());
                    let shutdown = Arc::clone(&shutdown);
                    move || discovery::run_discovery_loop(lister, ports, discovery_period, shutdown)
                }),
            ),
            (
                "connect",
                thread::spawn({
                    let system = Arc::clone(&system);
                    let shutdown = Arc::clone(&shutdown);
                    move || connect::run_connect_worker(system, request_rx, shutdown)
                }),
            ),
        ];

        info!(workers = workers.len(), "threaded runtime started");
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

    fn submit(
        &self,
        build: impl FnOnce(Sender<StageResult<()>>) -> ConnectionRequest,
    ) -> Receiver<StageResult<()>> {
        let (reply_tx, reply_rx) = mpsc::channel();
        match &self.requests {
            Some(requests) => {
                if let Err(mpsc::SendError(request)) = requests.send(build(reply_tx)) {
                    request.reply(Err(StageError::WorkerStopped));
                }
            }
            None => {
                let _ = reply_tx.send(Err(StageError::WorkerStopped));
            }
        }
        reply_rx
    }

    /// Queue a connect; the outcome arrives on the returned channel.
    pub fn connect(&self, port: Option<String>) -> Receiver<StageResult<()>> {
        self.submit(|reply| ConnectionRequest::Connect { port, reply })
    }

    pub fn disconnect(&self) -> Receiver<StageResult<()>> {
        self.submit(|reply| ConnectionRequest::Disconnect { reply })
    }

    pub fn connect_blocking(&self, port: Option<String>) -> StageResult<()> {
        self.connect(port)
            .recv()
            .unwrap_or(Err(StageError::WorkerStopped))
    }

    pub fn disconnect_blocking(&self) -> StageResult<()> {
        self.disconnect()
            .recv()
            .unwrap_or(Err(StageError::WorkerStopped))
    }

    /// Stop every worker after its current tick, then close the hardware.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.shutdown.store(true, Ordering::Relaxed);
        self.requests = None;
        for (name, handle) in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!(worker = name, "worker panicked");
            }
        }
        self.system.disconnect();
        info!("threaded runtime stopped");
    }
}

impl Drop for StageRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

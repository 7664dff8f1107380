use std::sync::Arc;

use common::{StageError, StageResult, StageSystem};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

pub enum ConnectionRequest {
    Connect {
        port: Option<String>,
        reply: oneshot::Sender<StageResult<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<StageResult<()>>,
    },
}

pub(crate) async fn run_connect_worker(
    system: Arc<StageSystem>,
    mut requests: mpsc::Receiver<ConnectionRequest>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let request = tokio::select! {
            _ = shutdown.changed() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let system = Arc::clone(&system);
        match request {
            ConnectionRequest::Connect { port, reply } => {
                let outcome = tokio::task::spawn_blocking(move || system.connect(port.as_deref()))
                    .await
                    .unwrap_or(Err(StageError::WorkerStopped));
                if let Err(err) = &outcome {
                    warn!(%err, "connect failed");
                }
                let _ = reply.send(outcome);
            }
            ConnectionRequest::Disconnect { reply } => {
                let outcome = tokio::task::spawn_blocking(move || system.disconnect())
                    .await
                    .map_err(|_| StageError::WorkerStopped);
                let _ = reply.send(outcome);
            }
        }
    }
    debug!("connect worker stopped");
}

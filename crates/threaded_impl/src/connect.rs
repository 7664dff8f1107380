use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use common::{StageResult, StageSystem};
use tracing::{debug, warn};

/// Work for the connection worker. Each request carries its own reply channel.
pub enum ConnectionRequest {
    Connect {
        port: Option<String>,
        reply: Sender<StageResult<()>>,
    },
    Disconnect {
        reply: Sender<StageResult<()>>,
    },
}

impl ConnectionRequest {
    pub(crate) fn reply(self, outcome: StageResult<()>) {
        let reply = match self {
            ConnectionRequest::Connect { reply, .. } => reply,
            ConnectionRequest::Disconnect { reply } => reply,
        };
        // The requester may have stopped waiting.
        let _ = reply.send(outcome);
    }
}

pub(crate) fn run_connect_worker(
    system: Arc<StageSystem>,
    requests: Receiver<ConnectionRequest>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Relaxed) {
        let request = match requests.recv_timeout(Duration::from_millis(50)) {
            Ok(request) => request,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        match request {
            ConnectionRequest::Connect { port, reply } => {
                let outcome = system.connect(port.as_deref());
                if let Err(err) = &outcome {
                    warn!(%err, "connect failed");
                }
                let _ = reply.send(outcome);
            }
            ConnectionRequest::Disconnect { reply } => {
                system.disconnect();
                let _ = reply.send(Ok(()));
            }
        }
    }
    debug!("connect worker stopped");
}

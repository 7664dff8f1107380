use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::hardware::PortLister;
use common::ports::PortRegistry;
use tracing::{debug, info};

use crate::sleep_until;

pub(crate) fn run_discovery_loop(
    mut lister: Box<dyn PortLister>,
    ports: Arc<PortRegistry>,
    period: Duration,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Relaxed) {
        match lister.list() {
            Ok(found) => {
                if ports.update(found) {
                    info!(ports = ?ports.ports(), "serial ports changed");
                }
            }
            Err(err) => debug!(%err, "port discovery failed"),
        }
        sleep_until(Instant::now() + period, &shutdown);
    }
    debug!("discovery loop stopped");
}

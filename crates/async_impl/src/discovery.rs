use std::sync::Arc;
use std::time::Duration;

use common::hardware::PortLister;
use common::ports::PortRegistry;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

pub(crate) async fn run_discovery_loop(
    mut lister: Box<dyn PortLister>,
    ports: Arc<PortRegistry>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        // Enumeration can touch sysfs or the registry; keep it off the reactor.
        let listed = tokio::task::spawn_blocking(move || {
            let found = lister.list();
            (lister, found)
        })
        .await;
        let found = match listed {
            Ok((returned, found)) => {
                lister = returned;
                found
            }
            Err(err) => {
                warn!(%err, "port discovery task failed");
                break;
            }
        };

        match found {
            Ok(found) => {
                if ports.update(found) {
                    info!(ports = ?ports.ports(), "serial ports changed");
                }
            }
            Err(err) => debug!(%err, "port discovery failed"),
        }
    }
    debug!("discovery loop stopped");
}

use std::sync::Arc;
use std::time::Duration;

use common::PidEngine;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

pub(crate) async fn run_control_loop(
    engine: Arc<PidEngine>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    // Late ticks restart the schedule instead of bursting to catch up.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cycle_id = 0u64;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        let engine = Arc::clone(&engine);
        match tokio::task::spawn_blocking(move || engine.tick()).await {
            Ok(report) => {
                if !report.sent.is_empty() || report.failed > 0 {
                    trace!(cycle_id, sent = report.sent.len(), failed = report.failed, "control tick");
                }
            }
            Err(err) => warn!(cycle_id, %err, "control tick aborted"),
        }
        cycle_id += 1;
    }
    debug!(cycles = cycle_id, "control loop stopped");
}

use std::sync::Arc;

use common::DataLogger;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Sleeps to an explicit deadline rather than using `interval` so that an
/// interval change applies from the next sample.
pub(crate) async fn run_logger_loop(logger: Arc<DataLogger>, mut shutdown: watch::Receiver<bool>) {
    let mut next_tick = Instant::now();
    let mut samples = 0u64;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep_until(next_tick) => {}
        }

        let now = Instant::now();
        let interval = logger.interval();
        next_tick += interval;
        if now > next_tick {
            next_tick = now + interval;
        }

        if logger.tick_at(now.into_std()).is_some() {
            samples += 1;
        }
    }
    debug!(samples, "logger loop stopped");
}

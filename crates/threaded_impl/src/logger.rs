use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use common::DataLogger;
use tracing::debug;

use crate::sleep_until;

/// Logger ticks at the logger's current interval, re-read every tick so an
/// interval change takes effect on the next sample.
pub(crate) fn run_logger_loop(logger: Arc<DataLogger>, shutdown: Arc<AtomicBool>) {
    let mut next_tick = Instant::now();
    let mut samples = 0u64;

    while !shutdown.load(Ordering::Relaxed) {
        sleep_until(next_tick, &shutdown);
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        let now = Instant::now();
        let interval = logger.interval();
        next_tick += interval;
        if now > next_tick {
            next_tick = now + interval;
        }

        if logger.tick_at(now).is_some() {
            samples += 1;
        }
    }
    debug!(samples, "logger loop stopped");
}

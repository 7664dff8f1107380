use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::PidEngine;
use tracing::{debug, trace};

use crate::sleep_until;

/// Fixed-rate control ticks. A tick that overruns its slot is not made up
/// for; the schedule restarts from the late tick.
pub(crate) fn run_control_loop(engine: Arc<PidEngine>, period: Duration, shutdown: Arc<AtomicBool>) {
    let mut next_tick = Instant::now();
    let mut cycle_id = 0u64;

    while !shutdown.load(Ordering::Relaxed) {
        let expected = next_tick;
        next_tick += period;
        sleep_until(expected, &shutdown);
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        let actual = Instant::now();
        if actual > next_tick {
            trace!(cycle_id, late_us = actual.duration_since(expected).as_micros() as u64, "control tick late");
            next_tick = actual + period;
        }

        let report = engine.tick_at(actual);
        if !report.sent.is_empty() || report.failed > 0 {
            trace!(cycle_id, sent = report.sent.len(), failed = report.failed, "control tick");
        }
        cycle_id += 1;
    }
    debug!(cycles = cycle_id, "control loop stopped");
}

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters shared by every worker; all updates are lock-free.
#[derive(Default, Debug)]
pub struct SharedDiagnostics {
    pub control_ticks: AtomicU64,
    pub skipped_axes: AtomicU64,
    pub transport_errors: AtomicU64,
    pub logger_ticks: AtomicU64,
    pub rejected_commands: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticsSnapshot {
    pub control_ticks: u64,
    pub skipped_axes: u64,
    pub transport_errors: u64,
    pub logger_ticks: u64,
    pub rejected_commands: u64,
}

impl SharedDiagnostics {
    pub fn record_control_tick(&self) {
        self.control_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped_axis(&self) {
        self.skipped_axes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_logger_tick(&self) {
        self.logger_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_command(&self) {
        self.rejected_commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            control_ticks: self.control_ticks.load(Ordering::Relaxed),
            skipped_axes: self.skipped_axes.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            logger_ticks: self.logger_ticks.load(Ordering::Relaxed),
            rejected_commands: self.rejected_commands.load(Ordering::Relaxed),
        }
    }
}

//! Periodic telemetry capture into per-axis series.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::connection::{ConnectionStatus, Endpoint};
use crate::diagnostics::SharedDiagnostics;
use crate::engine::{AxisMode, PidEngine};
use crate::error::{StageError, StageResult};
use crate::feedback::FeedbackSource;
use crate::session::SessionClock;
use crate::timeseries::Timeseries;
use crate::AxisId;

/// Channel tag used for the feedback source's own raw series.
pub const RAW_CHANNEL: &str = "raw";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogChannel {
    Feedback,
    Target,
    Output,
}

impl LogChannel {
    pub const ALL: [LogChannel; 3] = [LogChannel::Feedback, LogChannel::Target, LogChannel::Output];

    pub fn as_str(self) -> &'static str {
        match self {
            LogChannel::Feedback => "feedback",
            LogChannel::Target => "target",
            LogChannel::Output => "output",
        }
    }
}

/// `<data_dir>/<file_name>_<channel>_<axis>.csv`
pub fn series_path(data_dir: &Path, file_name: &str, channel: &str, axis: AxisId) -> PathBuf {
    data_dir.join(format!("{file_name}_{channel}_{axis}.csv"))
}

struct Naming {
    data_dir: PathBuf,
    file_name: String,
}

pub struct DataLogger {
    feedback: Arc<FeedbackSource>,
    engine: Arc<PidEngine>,
    clock: Arc<SessionClock>,
    status: Arc<ConnectionStatus>,
    diagnostics: Arc<SharedDiagnostics>,
    /// Indexed `[channel][axis]` in [`LogChannel::ALL`] order.
    series: Mutex<Vec<Vec<Timeseries>>>,
    naming: Mutex<Naming>,
    interval_ms: AtomicU64,
}

impl DataLogger {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        feedback: Arc<FeedbackSource>,
        engine: Arc<PidEngine>,
        clock: Arc<SessionClock>,
        status: Arc<ConnectionStatus>,
        diagnostics: Arc<SharedDiagnostics>,
        data_dir: PathBuf,
        file_name: String,
        interval: Duration,
    ) -> Self {
        let axes = feedback.channel_count();
        let series = LogChannel::ALL
            .iter()
            .map(|channel| {
                (0..axes)
                    .map(|axis| {
                        Timeseries::new(series_path(&data_dir, &file_name, channel.as_str(), axis))
                    })
                    .collect()
            })
            .collect();
        Self {
            feedback,
            engine,
            clock,
            status,
            diagnostics,
            series: Mutex::new(series),
            naming: Mutex::new(Naming {
                data_dir,
                file_name,
            }),
            interval_ms: AtomicU64::new(interval.as_millis().max(1) as u64),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Relaxed))
    }

    pub fn set_interval(&self, interval: Duration) -> StageResult<()> {
        let ms = interval.as_millis() as u64;
        if ms == 0 {
            return Err(StageError::InvalidInterval(ms));
        }
        self.interval_ms.store(ms, Ordering::Relaxed);
        Ok(())
    }

    pub fn file_name(&self) -> String {
        self.naming.lock().file_name.clone()
    }

    /// Retarget every series, logger and raw, at files named after `name`.
    pub fn set_file_name(&self, name: &str) -> StageResult<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StageError::Config("log file name must not be empty".into()));
        }
        let mut naming = self.naming.lock();
        naming.file_name = name.to_string();

        let mut series = self.series.lock();
        for (channel, per_axis) in LogChannel::ALL.iter().zip(series.iter_mut()) {
            for (axis, s) in per_axis.iter_mut().enumerate() {
                s.set_path(series_path(&naming.data_dir, name, channel.as_str(), axis));
            }
        }
        self.feedback.set_raw_paths(
            (0..self.feedback.channel_count())
                .map(|axis| series_path(&naming.data_dir, name, RAW_CHANNEL, axis)),
        );
        Ok(())
    }

    pub fn tick(&self) -> Option<u64> {
        self.tick_at(Instant::now())
    }

    /// Append one sample per channel. Returns the elapsed time used, or
    /// `None` when there is no session or the sensor is offline.
    pub fn tick_at(&self, now: Instant) -> Option<u64> {
        if !self.status.is_connected(Endpoint::Sensor) {
            return None;
        }
        let axes = self.engine.snapshot();

        // Timestamp under the series lock so a concurrent clear cannot slip
        // an old-session time into a fresh series.
        let mut series = self.series.lock();
        let elapsed_ms = self.clock.elapsed_ms_at(now)?;

        for snap in &axes {
            let feedback = self
                .feedback
                .read(snap.axis)
                .ok()
                .and_then(|reading| reading.usable());
            // Idle axes keep their last target and output, but nothing is sent.
            let (target, output) = match snap.mode {
                AxisMode::Tracking => (snap.target, snap.output),
                AxisMode::Idle => (None, None),
            };
            let values = [feedback, target, output];
            for (per_axis, value) in series.iter_mut().zip(values) {
                let (Some(value), Some(s)) = (value, per_axis.get_mut(snap.axis)) else {
                    continue;
                };
                if let Err(err) = s.append(elapsed_ms, value) {
                    debug!(axis = snap.axis, %err, "dropped log sample");
                }
            }
        }
        self.diagnostics.record_logger_tick();
        Some(elapsed_ms)
    }

    /// Write every series to disk and return the files written.
    pub fn save(&self) -> StageResult<Vec<PathBuf>> {
        let snapshots: Vec<Timeseries> = self.series.lock().iter().flatten().cloned().collect();

        let mut written = Vec::with_capacity(snapshots.len());
        for series in &snapshots {
            series.save()?;
            written.push(series.path().to_path_buf());
        }
        written.extend(self.feedback.save_raw()?);
        info!(files = written.len(), "telemetry saved");
        Ok(written)
    }

    /// Empty every series and restart the session clock if connected,
    /// otherwise leave it unset for the next connect.
    pub fn clear(&self) {
        {
            let mut series = self.series.lock();
            if self.status.is_online() {
                self.clock.rebase();
            } else {
                self.clock.invalidate();
            }
            for s in series.iter_mut().flatten() {
                s.reset();
            }
        }
        self.feedback.reset_raw();
        info!("telemetry cleared");
    }

    pub fn series_snapshot(&self, channel: LogChannel, axis: AxisId) -> Option<Timeseries> {
        let index = LogChannel::ALL.iter().position(|c| *c == channel)?;
        self.series.lock().get(index)?.get(axis).cloned()
    }
}

//! Latest-value feedback cells fed by the sensor collaborator.
//!
//! The sensor pushes `(channel, value)` through a [`FeedbackPublisher`]
//! whenever it has a fresh reading. The control and logging workers only ever
//! look at the most recent value per channel, so a slow tick never leaves a
//! backlog of stale samples behind it.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::connection::{ConnectionStatus, Endpoint};
use crate::error::{StageError, StageResult};
use crate::session::SessionClock;
use crate::timeseries::Timeseries;
use crate::AxisId;

/// What a worker sees when it asks for an axis's position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub value: Option<f64>,
    pub connected: bool,
}

impl Reading {
    /// The value, if the sensor is up and has reported at least once.
    pub fn usable(&self) -> Option<f64> {
        if self.connected {
            self.value
        } else {
            None
        }
    }
}

struct Channel {
    latest: Mutex<Option<f64>>,
    raw: Mutex<Timeseries>,
}

struct Shared {
    channels: Vec<Channel>,
    clock: Arc<SessionClock>,
}

pub struct FeedbackSource {
    shared: Arc<Shared>,
    status: Arc<ConnectionStatus>,
}

impl FeedbackSource {
    pub fn new(
        raw_paths: Vec<PathBuf>,
        clock: Arc<SessionClock>,
        status: Arc<ConnectionStatus>,
    ) -> Self {
        let channels = raw_paths
            .into_iter()
            .map(|path| Channel {
                latest: Mutex::new(None),
                raw: Mutex::new(Timeseries::new(path)),
            })
            .collect();
        Self {
            shared: Arc::new(Shared { channels, clock }),
            status,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.shared.channels.len()
    }

    /// Handle given to the sensor collaborator on attach.
    pub fn publisher(&self) -> FeedbackPublisher {
        FeedbackPublisher {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Most recent value for `axis`. Never blocks on hardware.
    pub fn read(&self, axis: AxisId) -> StageResult<Reading> {
        let channel = self
            .shared
            .channels
            .get(axis)
            .ok_or(StageError::UnknownAxis(axis))?;
        Ok(Reading {
            value: *channel.latest.lock(),
            connected: self.status.is_connected(Endpoint::Sensor),
        })
    }

    /// Drop cached values so a new session never starts from stale data.
    pub fn clear_latest(&self) {
        for channel in &self.shared.channels {
            *channel.latest.lock() = None;
        }
    }

    pub fn set_raw_paths(&self, paths: impl IntoIterator<Item = PathBuf>) {
        for (channel, path) in self.shared.channels.iter().zip(paths) {
            channel.raw.lock().set_path(path);
        }
    }

    /// Copy of the raw series recorded for `axis`.
    pub fn raw_snapshot(&self, axis: AxisId) -> Option<Timeseries> {
        self.shared
            .channels
            .get(axis)
            .map(|channel| channel.raw.lock().clone())
    }

    /// Save every raw series. Each one is copied under its lock and written
    /// after the lock is released, so publishing is never held up by disk I/O.
    pub fn save_raw(&self) -> StageResult<Vec<PathBuf>> {
        let snapshots: Vec<Timeseries> = self
            .shared
            .channels
            .iter()
            .map(|channel| channel.raw.lock().clone())
            .collect();
        let mut written = Vec::with_capacity(snapshots.len());
        for series in snapshots {
            series.save()?;
            written.push(series.path().to_path_buf());
        }
        Ok(written)
    }

    pub fn reset_raw(&self) {
        for channel in &self.shared.channels {
            channel.raw.lock().reset();
        }
    }
}

/// Push side of the feedback cells. Cheap to clone and `Send`.
#[derive(Clone)]
pub struct FeedbackPublisher {
    shared: Arc<Shared>,
}

impl FeedbackPublisher {
    pub fn publish(&self, channel: AxisId, value: f64) -> StageResult<()> {
        let slot = self
            .shared
            .channels
            .get(channel)
            .ok_or(StageError::UnknownAxis(channel))?;

        *slot.latest.lock() = Some(value);

        // Timestamp under the series lock so concurrent pushes stay ordered.
        let mut raw = slot.raw.lock();
        if let Some(elapsed_ms) = self.shared.clock.elapsed_ms() {
            if let Err(err) = raw.append(elapsed_ms, value) {
                debug!(channel, %err, "dropped raw sample");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState;

    fn source() -> (FeedbackSource, Arc<ConnectionStatus>, Arc<SessionClock>) {
        let status = Arc::new(ConnectionStatus::new());
        let clock = Arc::new(SessionClock::new());
        let source = FeedbackSource::new(
            vec!["raw_0.csv".into(), "raw_1.csv".into()],
            Arc::clone(&clock),
            Arc::clone(&status),
        );
        (source, status, clock)
    }

    #[test]
    fn latest_value_wins() {
        let (source, status, _) = source();
        status.set(Endpoint::Sensor, ConnectionState::Connected);
        let publisher = source.publisher();
        publisher.publish(1, 0.1).unwrap();
        publisher.publish(1, 0.2).unwrap();
        publisher.publish(1, 0.3).unwrap();

        let reading = source.read(1).unwrap();
        assert_eq!(reading.usable(), Some(0.3));
        assert_eq!(source.read(0).unwrap().usable(), None);
    }

    #[test]
    fn disconnected_reading_is_not_usable() {
        let (source, _, _) = source();
        source.publisher().publish(0, 4.0).unwrap();
        let reading = source.read(0).unwrap();
        assert_eq!(reading.value, Some(4.0));
        assert!(!reading.connected);
        assert_eq!(reading.usable(), None);
    }

    #[test]
    fn raw_series_only_recorded_during_a_session() {
        let (source, _, clock) = source();
        let publisher = source.publisher();
        publisher.publish(0, 1.0).unwrap();
        assert!(source.raw_snapshot(0).unwrap().is_empty());

        clock.start_if_unset();
        publisher.publish(0, 2.0).unwrap();
        publisher.publish(0, 3.0).unwrap();
        let raw = source.raw_snapshot(0).unwrap();
        assert_eq!(raw.len(), 2);
        assert_eq!(raw.last().unwrap().value, 3.0);
    }

    #[test]
    fn unknown_channel_is_rejected() {
        let (source, _, _) = source();
        assert!(matches!(
            source.publisher().publish(7, 1.0),
            Err(StageError::UnknownAxis(7))
        ));
        assert!(matches!(source.read(2), Err(StageError::UnknownAxis(2))));
    }
}

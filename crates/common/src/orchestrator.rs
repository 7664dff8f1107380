use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::actuator::ActuatorSink;
use crate::connection::{ConnectionState, ConnectionStatus};
use crate::engine::PidEngine;
use crate::error::{StageError, StageResult};
use crate::feedback::FeedbackSource;
use crate::hardware::SensorDevice;
use crate::session::SessionClock;

/// Brings the sensor and actuator up and down as one unit.
///
/// Calls may block for the attach timeout, so they belong on their own
/// worker, never on the control or logging loop.
pub struct ConnectionOrchestrator {
    status: Arc<ConnectionStatus>,
    sensor: Mutex<Box<dyn SensorDevice>>,
    actuator: Arc<ActuatorSink>,
    feedback: Arc<FeedbackSource>,
    engine: Arc<PidEngine>,
    clock: Arc<SessionClock>,
    attach_timeout: Duration,
    data_dir: PathBuf,
    /// Serialises connect and disconnect against each other.
    sequence: Mutex<()>,
}

impl ConnectionOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        status: Arc<ConnectionStatus>,
        sensor: Box<dyn SensorDevice>,
        actuator: Arc<ActuatorSink>,
        feedback: Arc<FeedbackSource>,
        engine: Arc<PidEngine>,
        clock: Arc<SessionClock>,
        attach_timeout: Duration,
        data_dir: PathBuf,
    ) -> Self {
        Self {
            status,
            sensor: Mutex::new(sensor),
            actuator,
            feedback,
            engine,
            clock,
            attach_timeout,
            data_dir,
            sequence: Mutex::new(()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status.is_online()
    }

    /// Open the actuator on `port`, then attach the sensor. Either failure
    /// rolls both back and leaves everything disconnected.
    pub fn connect(&self, port: &str) -> StageResult<()> {
        let _guard = self.sequence.lock();
        if self.status.is_online() {
            return Ok(());
        }

        self.status.set_both(ConnectionState::Connecting);

        if let Err(err) = self.actuator.open(port) {
            // A transport may hold part of what it opened before failing.
            self.actuator.close();
            self.status.set_both(ConnectionState::Disconnected);
            warn!(port, %err, "actuator open failed");
            return Err(as_connection_error(err));
        }

        let attached = self
            .sensor
            .lock()
            .attach(self.attach_timeout, self.feedback.publisher());
        if let Err(err) = attached {
            self.sensor.lock().detach();
            self.actuator.close();
            self.feedback.clear_latest();
            self.status.set_both(ConnectionState::Disconnected);
            warn!(port, %err, "sensor attach failed, rolled back");
            return Err(as_connection_error(err));
        }

        if let Err(err) = fs::create_dir_all(&self.data_dir) {
            warn!(dir = %self.data_dir.display(), %err, "cannot create data directory");
        }
        if self.clock.start_if_unset() {
            info!("session started");
        }
        self.status.set_both(ConnectionState::Connected);
        info!(port, "stage connected");
        Ok(())
    }

    /// Close both transports and idle every axis. Safe to repeat.
    pub fn disconnect(&self) {
        let _guard = self.sequence.lock();
        let was_online = self.status.is_online();

        // Workers see the flip first and turn their ticks into no-ops.
        self.status.set_both(ConnectionState::Disconnected);
        self.engine.halt_all();
        self.sensor.lock().detach();
        self.actuator.close();
        self.feedback.clear_latest();

        if was_online {
            info!("stage disconnected");
        }
    }
}

fn as_connection_error(err: StageError) -> StageError {
    match err {
        StageError::Connection(_) => err,
        other => StageError::Connection(other.to_string()),
    }
}

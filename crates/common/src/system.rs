//! Wiring of one stage: every component built once and shared by `Arc`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::actuator::ActuatorSink;
use crate::config::{Backend, StageConfig};
use crate::connection::{ConnectionState, ConnectionStatus, Endpoint};
use crate::diagnostics::{DiagnosticsSnapshot, SharedDiagnostics};
use crate::engine::{AxisSnapshot, PidEngine};
use crate::error::{StageError, StageResult};
use crate::feedback::FeedbackSource;
use crate::hardware::{
    ActuatorTransport, JrkCli, JrkFeedbackSensor, SensorDevice, SerialFrameLink, SimulatedStage,
};
use crate::logger::{series_path, DataLogger, RAW_CHANNEL};
use crate::orchestrator::ConnectionOrchestrator;
use crate::ports::PortRegistry;
use crate::session::SessionClock;
use crate::AxisId;

/// Everything an operator display needs in one consistent-enough read.
#[derive(Debug, Clone, Serialize)]
pub struct StageStatus {
    pub sensor: ConnectionState,
    pub actuator: ConnectionState,
    pub session_ms: Option<u64>,
    pub axes: Vec<AxisSnapshot>,
    pub diagnostics: DiagnosticsSnapshot,
    pub ports: Vec<String>,
    pub file_name: String,
    pub log_interval_ms: u64,
}

pub struct StageSystem {
    config: StageConfig,
    status: Arc<ConnectionStatus>,
    clock: Arc<SessionClock>,
    diagnostics: Arc<SharedDiagnostics>,
    feedback: Arc<FeedbackSource>,
    actuator: Arc<ActuatorSink>,
    engine: Arc<PidEngine>,
    logger: Arc<DataLogger>,
    orchestrator: Arc<ConnectionOrchestrator>,
    ports: Arc<PortRegistry>,
}

impl StageSystem {
    pub fn new(
        config: StageConfig,
        sensor: Box<dyn SensorDevice>,
        transport: Box<dyn ActuatorTransport>,
    ) -> StageResult<Self> {
        config.validate()?;

        let status = Arc::new(ConnectionStatus::new());
        let clock = Arc::new(SessionClock::new());
        let diagnostics = Arc::new(SharedDiagnostics::default());

        let raw_paths: Vec<PathBuf> = (0..config.axis_count())
            .map(|axis| series_path(&config.data_dir, &config.file_name, RAW_CHANNEL, axis))
            .collect();
        let feedback = Arc::new(FeedbackSource::new(
            raw_paths,
            Arc::clone(&clock),
            Arc::clone(&status),
        ));
        let actuator = Arc::new(ActuatorSink::new(transport, Arc::clone(&status)));
        let engine = Arc::new(PidEngine::new(
            &config.axes,
            config.coupled_axes,
            Arc::clone(&feedback),
            Arc::clone(&actuator),
            Arc::clone(&diagnostics),
        ));
        let logger = Arc::new(DataLogger::new(
            Arc::clone(&feedback),
            Arc::clone(&engine),
            Arc::clone(&clock),
            Arc::clone(&status),
            Arc::clone(&diagnostics),
            config.data_dir.clone(),
            config.file_name.clone(),
            config.log_interval(),
        ));
        let orchestrator = Arc::new(ConnectionOrchestrator::new(
            Arc::clone(&status),
            sensor,
            Arc::clone(&actuator),
            Arc::clone(&feedback),
            Arc::clone(&engine),
            Arc::clone(&clock),
            config.attach_timeout(),
            config.data_dir.clone(),
        ));

        Ok(Self {
            config,
            status,
            clock,
            diagnostics,
            feedback,
            actuator,
            engine,
            logger,
            orchestrator,
            ports: Arc::new(PortRegistry::new()),
        })
    }

    /// System backed by an in-memory stage; the handle is returned for
    /// inspection and fault injection.
    pub fn simulated(config: StageConfig) -> StageResult<(Self, SimulatedStage)> {
        let stage = SimulatedStage::new(config.axis_count());
        let system = Self::new(config, Box::new(stage.sensor()), Box::new(stage.transport()))?;
        Ok((system, stage))
    }

    /// System for the backend named in the configuration.
    pub fn from_config(config: StageConfig) -> StageResult<Self> {
        info!(backend = ?config.backend, axes = config.axis_count(), "building stage");
        let poll = Duration::from_millis(config.jrk.poll_period_ms);
        match config.backend {
            Backend::Simulated => Self::simulated(config).map(|(system, _)| system),
            Backend::Jrk => {
                let sensor = JrkFeedbackSensor::new(config.jrk.axis_devices(), poll);
                let transport = JrkCli::new(config.jrk.axis_devices(), config.jrk.baud_rate);
                Self::new(config, Box::new(sensor), Box::new(transport))
            }
            Backend::Serial => {
                let sensor = JrkFeedbackSensor::new(config.jrk.axis_devices(), poll);
                let transport = SerialFrameLink::new(config.jrk.baud_rate);
                Self::new(config, Box::new(sensor), Box::new(transport))
            }
        }
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    pub fn connection(&self) -> &Arc<ConnectionStatus> {
        &self.status
    }

    pub fn clock(&self) -> &Arc<SessionClock> {
        &self.clock
    }

    pub fn diagnostics(&self) -> &Arc<SharedDiagnostics> {
        &self.diagnostics
    }

    pub fn feedback(&self) -> &Arc<FeedbackSource> {
        &self.feedback
    }

    pub fn actuator(&self) -> &Arc<ActuatorSink> {
        &self.actuator
    }

    pub fn engine(&self) -> &Arc<PidEngine> {
        &self.engine
    }

    pub fn logger(&self) -> &Arc<DataLogger> {
        &self.logger
    }

    pub fn orchestrator(&self) -> &Arc<ConnectionOrchestrator> {
        &self.orchestrator
    }

    pub fn ports(&self) -> &Arc<PortRegistry> {
        &self.ports
    }

    /// Port to use when the operator does not name one.
    pub fn resolve_port(&self, port: Option<&str>) -> StageResult<String> {
        port.map(str::to_string)
            .or_else(|| self.config.port.clone())
            .or_else(|| self.ports.first())
            .or_else(|| (self.config.backend == Backend::Simulated).then(|| "sim".to_string()))
            .ok_or_else(|| StageError::Connection("no serial port available".into()))
    }

    pub fn connect(&self, port: Option<&str>) -> StageResult<()> {
        let port = self.resolve_port(port)?;
        self.orchestrator.connect(&port)
    }

    pub fn disconnect(&self) {
        self.orchestrator.disconnect();
    }

    pub fn set_pid_params(
        &self,
        axis: AxisId,
        kp: f64,
        ki: f64,
        kd: f64,
        i_lim: f64,
    ) -> StageResult<()> {
        self.engine.set_pid_params(axis, kp, ki, kd, i_lim)
    }

    pub fn set_targets(&self, targets: &[f64]) -> StageResult<()> {
        self.engine.set_targets(targets)
    }

    pub fn disable_axis(&self, axis: AxisId) -> StageResult<()> {
        self.engine.disable(axis)
    }

    /// Position as the motor controller reports it, bypassing the sensor.
    pub fn scaled_feedback(&self, axis: AxisId) -> StageResult<f64> {
        self.actuator.scaled_feedback(axis)
    }

    pub fn set_file_name(&self, name: &str) -> StageResult<()> {
        self.logger.set_file_name(name)
    }

    pub fn save(&self) -> StageResult<Vec<PathBuf>> {
        self.logger.save()
    }

    pub fn clear(&self) {
        self.logger.clear();
    }

    pub fn set_log_interval(&self, interval: Duration) -> StageResult<()> {
        self.logger.set_interval(interval)
    }

    pub fn status(&self) -> StageStatus {
        StageStatus {
            sensor: self.status.get(Endpoint::Sensor),
            actuator: self.status.get(Endpoint::Actuator),
            session_ms: self.clock.elapsed_ms(),
            axes: self.engine.snapshot(),
            diagnostics: self.diagnostics.snapshot(),
            ports: self.ports.ports(),
            file_name: self.logger.file_name(),
            log_interval_ms: self.logger.interval().as_millis() as u64,
        }
    }
}

//! Pololu Jrk G2 motor controllers driven through the `jrk2cmd` tool.

use std::io::Write;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serialport::SerialPort;
use tracing::{debug, info, trace, warn};

use super::{ActuatorTransport, SensorDevice};
use crate::codec::{self, TargetFrame};
use crate::error::{StageError, StageResult};
use crate::feedback::FeedbackPublisher;
use crate::AxisId;

const DEFAULT_PROGRAM: &str = "jrk2cmd";

fn run_jrk2cmd(program: &str, args: &[&str]) -> StageResult<String> {
    trace!(program, ?args, "running");
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| StageError::Transport(format!("failed to run {program}: {e}")))?;
    if !output.status.success() {
        return Err(StageError::Transport(format!(
            "{program} {}: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Pull `Scaled feedback` out of `jrk2cmd -s --full` output.
pub fn parse_scaled_feedback(status: &str) -> StageResult<f64> {
    let doc: serde_yaml::Value = serde_yaml::from_str(status)
        .map_err(|e| StageError::Transport(format!("unreadable jrk status: {e}")))?;
    doc.get("Scaled feedback")
        .and_then(serde_yaml::Value::as_f64)
        .ok_or_else(|| StageError::Transport("jrk status has no scaled feedback".into()))
}

fn query_scaled_feedback(program: &str, device: &str) -> StageResult<f64> {
    let status = run_jrk2cmd(program, &["-d", device, "-s", "--full"])?;
    parse_scaled_feedback(&status)
}

/// Position reported for an axis with no Jrk, which has no feedback of its own.
pub const LINE_AXIS_FEEDBACK: f64 = 0.0;

fn axis_feedback(program: &str, device: Option<&str>) -> StageResult<f64> {
    match device {
        Some(device) => query_scaled_feedback(program, device),
        None => Ok(LINE_AXIS_FEEDBACK),
    }
}

/// Actuator transport: one Jrk per axis addressed by serial number, with
/// axes that have no Jrk assigned commanded by a decimal line on the serial
/// port (`"<target>\n"`).
pub struct JrkCli {
    program: String,
    devices: Vec<Option<String>>,
    baud_rate: u32,
    line_port: Option<Box<dyn SerialPort>>,
}

impl JrkCli {
    pub fn new(devices: Vec<Option<String>>, baud_rate: u32) -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            devices,
            baud_rate,
            line_port: None,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn device(&self, axis: AxisId) -> StageResult<Option<&str>> {
        self.devices
            .get(axis)
            .map(Option::as_deref)
            .ok_or(StageError::UnknownAxis(axis))
    }

    fn needs_line_port(&self) -> bool {
        self.devices.iter().any(Option::is_none)
    }
}

impl ActuatorTransport for JrkCli {
    fn open(&mut self, port: &str) -> StageResult<()> {
        if self.needs_line_port() {
            let handle = serialport::new(port, self.baud_rate)
                .timeout(Duration::from_millis(100))
                .open()
                .map_err(|e| StageError::Connection(format!("failed to open '{port}': {e}")))?;
            self.line_port = Some(handle);
        }
        for device in self.devices.iter().flatten() {
            if let Err(e) = query_scaled_feedback(&self.program, device) {
                self.line_port = None;
                return Err(StageError::Connection(format!("jrk {device} unreachable: {e}")));
            }
        }
        info!(port, "jrk controllers online");
        Ok(())
    }

    fn close(&mut self) {
        self.line_port = None;
    }

    fn write_target(&mut self, axis: AxisId, frame: TargetFrame) -> StageResult<()> {
        let target = codec::decode_checked(frame)?;
        match self.device(axis)?.map(str::to_owned) {
            Some(device) => {
                let target = target.to_string();
                run_jrk2cmd(&self.program, &["-d", &device, "--target", &target]).map(|_| ())
            }
            None => {
                let port = self.line_port.as_mut().ok_or(StageError::NotConnected)?;
                port.write_all(format!("{target}\n").as_bytes())
                    .map_err(|e| StageError::Transport(e.to_string()))
            }
        }
    }

    fn scaled_feedback(&mut self, axis: AxisId) -> StageResult<f64> {
        match self.device(axis)? {
            Some(device) => query_scaled_feedback(&self.program, device),
            None => Err(StageError::Transport(format!(
                "axis {axis} has no jrk to report feedback"
            ))),
        }
    }
}

/// Sensor that polls each Jrk's scaled feedback and publishes it on the
/// axis the Jrk drives. Axes without a Jrk publish [`LINE_AXIS_FEEDBACK`].
pub struct JrkFeedbackSensor {
    program: String,
    devices: Vec<Option<String>>,
    poll_period: Duration,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl JrkFeedbackSensor {
    pub fn new(devices: Vec<Option<String>>, poll_period: Duration) -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            devices,
            poll_period,
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

impl SensorDevice for JrkFeedbackSensor {
    fn attach(&mut self, timeout: Duration, publisher: FeedbackPublisher) -> StageResult<()> {
        self.detach();

        let deadline = Instant::now() + timeout;
        for (axis, device) in self.devices.iter().enumerate() {
            let value = axis_feedback(&self.program, device.as_deref()).map_err(|e| {
                StageError::Connection(format!("axis {axis} feedback did not attach: {e}"))
            })?;
            publisher.publish(axis, value)?;
            if Instant::now() > deadline {
                return Err(StageError::Connection(format!(
                    "jrk attach exceeded {} ms",
                    timeout.as_millis()
                )));
            }
        }

        let stop = Arc::new(AtomicBool::new(false));
        self.stop = Arc::clone(&stop);
        let program = self.program.clone();
        let devices = self.devices.clone();
        let period = self.poll_period;
        self.worker = Some(thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                for (axis, device) in devices.iter().enumerate() {
                    match axis_feedback(&program, device.as_deref()) {
                        Ok(value) => {
                            if let Err(err) = publisher.publish(axis, value) {
                                warn!(axis, %err, "publish failed");
                            }
                        }
                        Err(err) => warn!(axis, ?device, %err, "feedback poll failed"),
                    }
                }
                thread::sleep(period);
            }
            debug!("jrk feedback poller stopped");
        }));
        Ok(())
    }

    fn detach(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("jrk feedback poller panicked");
            }
        }
    }
}

impl Drop for JrkFeedbackSensor {
    fn drop(&mut self) {
        self.detach();
    }
}

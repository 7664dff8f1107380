//! In-memory stage used by the console's `simulated` backend, the benchmark
//! runner and the tests.
//!
//! Each axis moves a fixed fraction of the way toward its last commanded
//! target on every sensor update, and the sensor thread publishes the new
//! position. Attach, open and write failures can be injected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{ActuatorTransport, SensorDevice};
use crate::codec::{self, TargetFrame};
use crate::error::{StageError, StageResult};
use crate::feedback::FeedbackPublisher;
use crate::AxisId;

#[derive(Debug)]
struct SimState {
    positions: Vec<f64>,
    commanded: Vec<Option<f64>>,
    frames: Vec<(AxisId, TargetFrame)>,
    port: Option<String>,
    attached: bool,
    fail_attach: bool,
    fail_open: bool,
    fail_writes: bool,
}

/// Shared handle to one simulated stage.
#[derive(Clone)]
pub struct SimulatedStage {
    state: Arc<Mutex<SimState>>,
    response: f64,
    update_period: Duration,
}

impl SimulatedStage {
    pub fn new(axes: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                positions: vec![0.0; axes],
                commanded: vec![None; axes],
                frames: Vec::new(),
                port: None,
                attached: false,
                fail_attach: false,
                fail_open: false,
                fail_writes: false,
            })),
            response: 0.2,
            update_period: Duration::from_millis(5),
        }
    }

    /// Fraction of the remaining distance covered per update. Zero freezes
    /// the stage at its current positions.
    pub fn with_response(mut self, response: f64) -> Self {
        self.response = response.clamp(0.0, 1.0);
        self
    }

    pub fn with_update_period(mut self, period: Duration) -> Self {
        self.update_period = period;
        self
    }

    pub fn sensor(&self) -> SimulatedSensor {
        SimulatedSensor {
            stage: self.clone(),
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn transport(&self) -> SimulatedTransport {
        SimulatedTransport { stage: self.clone() }
    }

    pub fn set_position(&self, axis: AxisId, value: f64) {
        if let Some(slot) = self.state.lock().positions.get_mut(axis) {
            *slot = value;
        }
    }

    pub fn position(&self, axis: AxisId) -> Option<f64> {
        self.state.lock().positions.get(axis).copied()
    }

    /// Every frame written so far, oldest first.
    pub fn frames(&self) -> Vec<(AxisId, TargetFrame)> {
        self.state.lock().frames.clone()
    }

    pub fn port(&self) -> Option<String> {
        self.state.lock().port.clone()
    }

    pub fn is_attached(&self) -> bool {
        self.state.lock().attached
    }

    pub fn set_fail_attach(&self, fail: bool) {
        self.state.lock().fail_attach = fail;
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Advance the model one step and return the new positions.
    fn step(&self) -> Vec<f64> {
        let mut state = self.state.lock();
        let SimState {
            positions,
            commanded,
            ..
        } = &mut *state;
        for (position, target) in positions.iter_mut().zip(commanded.iter()) {
            if let Some(target) = target {
                *position += (*target - *position) * self.response;
            }
        }
        positions.clone()
    }
}

pub struct SimulatedSensor {
    stage: SimulatedStage,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SensorDevice for SimulatedSensor {
    fn attach(&mut self, _timeout: Duration, publisher: FeedbackPublisher) -> StageResult<()> {
        {
            let mut state = self.stage.state.lock();
            if state.fail_attach {
                return Err(StageError::Connection("simulated sensor did not attach".into()));
            }
            state.attached = true;
        }
        self.detach_worker();

        // First reading goes out before attach returns.
        for (axis, value) in self.stage.step().into_iter().enumerate() {
            publisher.publish(axis, value)?;
        }

        let stop = Arc::new(AtomicBool::new(false));
        self.stop = Arc::clone(&stop);
        let stage = self.stage.clone();
        self.worker = Some(thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                thread::sleep(stage.update_period);
                for (axis, value) in stage.step().into_iter().enumerate() {
                    if let Err(err) = publisher.publish(axis, value) {
                        warn!(axis, %err, "simulated sensor publish failed");
                    }
                }
            }
            debug!("simulated sensor stopped");
        }));
        Ok(())
    }

    fn detach(&mut self) {
        self.detach_worker();
        self.stage.state.lock().attached = false;
    }
}

impl SimulatedSensor {
    fn detach_worker(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("simulated sensor thread panicked");
            }
        }
    }
}

impl Drop for SimulatedSensor {
    fn drop(&mut self) {
        self.detach_worker();
    }
}

pub struct SimulatedTransport {
    stage: SimulatedStage,
}

impl ActuatorTransport for SimulatedTransport {
    fn open(&mut self, port: &str) -> StageResult<()> {
        let mut state = self.stage.state.lock();
        if state.fail_open {
            return Err(StageError::Connection(format!("cannot open {port}")));
        }
        state.port = Some(port.to_string());
        Ok(())
    }

    fn close(&mut self) {
        self.stage.state.lock().port = None;
    }

    fn write_target(&mut self, axis: AxisId, frame: TargetFrame) -> StageResult<()> {
        let mut state = self.stage.state.lock();
        if state.port.is_none() {
            return Err(StageError::Transport("simulated port closed".into()));
        }
        if state.fail_writes {
            return Err(StageError::Transport("simulated write failure".into()));
        }
        let target = codec::decode_checked(frame)?;
        let slot = state
            .commanded
            .get_mut(axis)
            .ok_or(StageError::UnknownAxis(axis))?;
        *slot = Some(f64::from(target));
        state.frames.push((axis, frame));
        Ok(())
    }

    fn scaled_feedback(&mut self, axis: AxisId) -> StageResult<f64> {
        self.stage
            .position(axis)
            .ok_or(StageError::UnknownAxis(axis))
    }
}

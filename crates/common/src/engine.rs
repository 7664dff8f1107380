//! Closed-loop PID engine: one controller per axis.
//!
//! All axis state sits behind a single lock. A tick computes every axis under
//! that lock and releases it before any target is written, so a slow serial
//! write never holds up a gain change and a gain change is never seen half
//! applied.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::actuator::ActuatorSink;
use crate::codec::TargetFrame;
use crate::config::AxisConfig;
use crate::diagnostics::SharedDiagnostics;
use crate::error::{StageError, StageResult};
use crate::feedback::FeedbackSource;
use crate::pid::{PidController, PidGains};
use crate::AxisId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AxisMode {
    /// No output is sent.
    Idle,
    /// Each tick computes and sends a target.
    Tracking,
}

#[derive(Debug)]
struct AxisState {
    pid: PidController,
    output_min: f64,
    output_max: f64,
    mode: AxisMode,
    target: Option<f64>,
    last_feedback: Option<f64>,
    last_tick: Option<Instant>,
    last_output: Option<f64>,
    last_command: Option<i16>,
}

impl AxisState {
    fn new(config: &AxisConfig) -> Self {
        Self {
            pid: PidController::new(config.gains()),
            output_min: config.output_min,
            output_max: config.output_max,
            mode: AxisMode::Idle,
            target: None,
            last_feedback: None,
            last_tick: None,
            last_output: None,
            last_command: None,
        }
    }

    fn go_idle(&mut self) {
        self.mode = AxisMode::Idle;
        self.pid.reset();
        self.last_tick = None;
    }

    fn to_command(&self, output: f64) -> i16 {
        // Limits are validated to lie inside the i16 range.
        output.clamp(self.output_min, self.output_max).round() as i16
    }
}

/// Consistent copy of one axis, taken under the engine lock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AxisSnapshot {
    pub axis: AxisId,
    pub mode: AxisMode,
    pub gains: PidGains,
    pub target: Option<f64>,
    pub feedback: Option<f64>,
    pub integral: f64,
    pub prev_error: Option<f64>,
    pub output: Option<f64>,
    pub command: Option<i16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentTarget {
    pub axis: AxisId,
    pub command: i16,
    pub frame: TargetFrame,
}

/// Outcome of one control tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub sent: Vec<SentTarget>,
    /// Tracking axes with no usable feedback or no connected actuator.
    pub skipped: usize,
    /// Tracking axes whose write failed.
    pub failed: usize,
}

pub struct PidEngine {
    axes: Mutex<Vec<AxisState>>,
    coupled_axes: Option<[AxisId; 2]>,
    feedback: Arc<FeedbackSource>,
    actuator: Arc<ActuatorSink>,
    diagnostics: Arc<SharedDiagnostics>,
}

impl PidEngine {
    pub fn new(
        axes: &[AxisConfig],
        coupled_axes: Option<[AxisId; 2]>,
        feedback: Arc<FeedbackSource>,
        actuator: Arc<ActuatorSink>,
        diagnostics: Arc<SharedDiagnostics>,
    ) -> Self {
        Self {
            axes: Mutex::new(axes.iter().map(AxisState::new).collect()),
            coupled_axes,
            feedback,
            actuator,
            diagnostics,
        }
    }

    pub fn axis_count(&self) -> usize {
        self.axes.lock().len()
    }

    pub fn tick(&self) -> TickReport {
        self.tick_at(Instant::now())
    }

    /// Run one control step as if the current time were `now`.
    pub fn tick_at(&self, now: Instant) -> TickReport {
        let mut report = TickReport::default();
        let mut pending = Vec::new();

        {
            let mut axes = self.axes.lock();
            for (axis, state) in axes.iter_mut().enumerate() {
                if state.mode == AxisMode::Idle {
                    continue;
                }
                let Some(target) = state.target else {
                    continue;
                };

                let feedback = self
                    .feedback
                    .read(axis)
                    .ok()
                    .and_then(|reading| reading.usable())
                    .filter(|value| value.is_finite());
                let Some(position) = feedback else {
                    debug!(axis, "no feedback, skipping axis");
                    self.diagnostics.record_skipped_axis();
                    report.skipped += 1;
                    continue;
                };

                let dt = state
                    .last_tick
                    .map(|last| now.saturating_duration_since(last).as_secs_f64())
                    .unwrap_or(0.0);
                let error = target - position;
                let output = state.pid.compute(error, dt);
                let command = state.to_command(output);

                state.last_tick = Some(now);
                state.last_feedback = Some(position);
                state.last_output = Some(output);
                state.last_command = Some(command);
                pending.push((axis, command));
            }
        }

        for (axis, command) in pending {
            match self.actuator.send(axis, command) {
                Ok(frame) => report.sent.push(SentTarget {
                    axis,
                    command,
                    frame,
                }),
                Err(StageError::NotConnected) => {
                    debug!(axis, "actuator offline, target dropped");
                    self.diagnostics.record_skipped_axis();
                    report.skipped += 1;
                }
                Err(err) => {
                    warn!(axis, command, %err, "target dropped");
                    self.diagnostics.record_transport_error();
                    report.failed += 1;
                }
            }
        }

        self.diagnostics.record_control_tick();
        report
    }

    /// Set every axis target at once and start tracking.
    ///
    /// Rejected without any change when the count is wrong, a value is not
    /// finite, or the coupled pair does not share a strict sign.
    pub fn set_targets(&self, targets: &[f64]) -> StageResult<()> {
        let mut axes = self.axes.lock();
        if let Err(err) = self.check_targets(axes.len(), targets) {
            self.diagnostics.record_rejected_command();
            return Err(err);
        }
        for (state, target) in axes.iter_mut().zip(targets) {
            if state.mode == AxisMode::Idle {
                state.pid.reset();
                state.last_tick = None;
            }
            state.mode = AxisMode::Tracking;
            state.target = Some(*target);
        }
        Ok(())
    }

    fn check_targets(&self, axis_count: usize, targets: &[f64]) -> StageResult<()> {
        if targets.len() != axis_count {
            return Err(StageError::InvalidTarget(format!(
                "expected {axis_count} targets, got {}",
                targets.len()
            )));
        }
        if let Some(bad) = targets.iter().find(|t| !t.is_finite()) {
            return Err(StageError::InvalidTarget(format!("{bad} is not a number")));
        }
        if let Some([a, b]) = self.coupled_axes {
            let (ta, tb) = (targets[a], targets[b]);
            if ta * tb <= 0.0 {
                return Err(StageError::InvalidTarget(format!(
                    "axis {a} target {ta} and axis {b} target {tb} must share a sign; \
                     this combination would be unstable"
                )));
            }
        }
        Ok(())
    }

    /// Replace one axis's gains and integral limit in a single step.
    pub fn set_pid_params(
        &self,
        axis: AxisId,
        kp: f64,
        ki: f64,
        kd: f64,
        i_lim: f64,
    ) -> StageResult<()> {
        let gains = PidGains::new(kp, ki, kd, i_lim);
        if let Err(err) = gains.validate() {
            self.diagnostics.record_rejected_command();
            return Err(err);
        }
        let mut axes = self.axes.lock();
        let state = axes.get_mut(axis).ok_or(StageError::UnknownAxis(axis))?;
        state.pid.set_gains(gains);
        Ok(())
    }

    /// Stop driving one axis. Its target is kept.
    pub fn disable(&self, axis: AxisId) -> StageResult<()> {
        let mut axes = self.axes.lock();
        let state = axes.get_mut(axis).ok_or(StageError::UnknownAxis(axis))?;
        state.go_idle();
        Ok(())
    }

    /// Every axis to Idle with a zeroed integral.
    pub fn halt_all(&self) {
        for state in self.axes.lock().iter_mut() {
            state.go_idle();
        }
    }

    pub fn snapshot(&self) -> Vec<AxisSnapshot> {
        self.axes
            .lock()
            .iter()
            .enumerate()
            .map(|(axis, state)| AxisSnapshot {
                axis,
                mode: state.mode,
                gains: state.pid.gains(),
                target: state.target,
                feedback: state.last_feedback,
                integral: state.pid.integral(),
                prev_error: state.pid.prev_error(),
                output: state.last_output,
                command: state.last_command,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionState, ConnectionStatus};
    use crate::feedback::FeedbackPublisher;
    use crate::hardware::{ActuatorTransport, SimulatedStage};
    use crate::session::SessionClock;
    use std::time::Duration;

    struct Rig {
        engine: PidEngine,
        publisher: FeedbackPublisher,
        status: Arc<ConnectionStatus>,
        stage: SimulatedStage,
    }

    fn rig() -> Rig {
        let status = Arc::new(ConnectionStatus::new());
        let clock = Arc::new(SessionClock::new());
        let feedback = Arc::new(FeedbackSource::new(
            vec!["a.csv".into(), "b.csv".into()],
            clock,
            Arc::clone(&status),
        ));
        let stage = SimulatedStage::new(2).with_response(0.0);
        let mut transport = stage.transport();
        transport.open("sim").unwrap();
        let actuator = Arc::new(ActuatorSink::new(Box::new(transport), Arc::clone(&status)));
        let engine = PidEngine::new(
            &[AxisConfig::default(), AxisConfig::default()],
            Some([0, 1]),
            Arc::clone(&feedback),
            actuator,
            Arc::new(SharedDiagnostics::default()),
        );
        status.set_both(ConnectionState::Connected);
        Rig {
            engine,
            publisher: feedback.publisher(),
            status,
            stage,
        }
    }

    #[test]
    fn proportional_step_sends_encoded_target() {
        let rig = rig();
        rig.engine.set_pid_params(0, 1.0, 0.0, 0.0, 100.0).unwrap();
        rig.publisher.publish(0, 0.0).unwrap();
        rig.publisher.publish(1, 0.0).unwrap();
        rig.engine.set_targets(&[10.0, 3.0]).unwrap();

        let report = rig.engine.tick();
        assert_eq!(
            report.sent[0],
            SentTarget {
                axis: 0,
                command: 10,
                frame: [10, 0, 0]
            }
        );
        assert_eq!(rig.engine.snapshot()[0].output, Some(10.0));
        assert_eq!(rig.stage.frames()[0], (0, [10, 0, 0]));
    }

    #[test]
    fn sign_mismatch_is_rejected_without_mutation() {
        let rig = rig();
        rig.engine.set_targets(&[5.0, 3.0]).unwrap();
        let err = rig.engine.set_targets(&[5.0, -3.0]).unwrap_err();
        assert!(matches!(err, StageError::InvalidTarget(_)));
        assert!(rig.engine.set_targets(&[0.0, 3.0]).is_err());
        assert!(rig.engine.set_targets(&[5.0]).is_err());

        let snap = rig.engine.snapshot();
        assert_eq!(snap[0].target, Some(5.0));
        assert_eq!(snap[1].target, Some(3.0));
    }

    #[test]
    fn both_negative_targets_are_accepted() {
        let rig = rig();
        rig.engine.set_targets(&[-5.0, -3.0]).unwrap();
        assert!(rig
            .engine
            .snapshot()
            .iter()
            .all(|a| a.mode == AxisMode::Tracking));
    }

    #[test]
    fn first_tick_has_no_derivative() {
        let rig = rig();
        rig.engine.set_pid_params(0, 0.0, 0.0, 50.0, 100.0).unwrap();
        rig.engine.set_pid_params(1, 0.0, 0.0, 50.0, 100.0).unwrap();
        rig.publisher.publish(0, 0.0).unwrap();
        rig.publisher.publish(1, 0.0).unwrap();
        rig.engine.set_targets(&[1000.0, 1000.0]).unwrap();

        let t0 = Instant::now();
        rig.engine.tick_at(t0);
        assert_eq!(rig.engine.snapshot()[0].output, Some(0.0));

        rig.publisher.publish(0, 100.0).unwrap();
        rig.engine.tick_at(t0 + Duration::from_millis(100));
        // (900 - 1000) / 0.1 * 50
        let out = rig.engine.snapshot()[0].output.unwrap();
        assert!((out + 50_000.0).abs() < 1e-6);
    }

    #[test]
    fn integral_never_leaves_its_limit() {
        let rig = rig();
        rig.engine.set_pid_params(0, 0.0, 1.0, 0.0, 3.0).unwrap();
        rig.publisher.publish(0, 0.0).unwrap();
        rig.publisher.publish(1, 0.0).unwrap();
        rig.engine.set_targets(&[500.0, 500.0]).unwrap();

        let t0 = Instant::now();
        for step in 0..50u64 {
            rig.engine.tick_at(t0 + Duration::from_millis(step * 50));
            let integral = rig.engine.snapshot()[0].integral;
            assert!((-3.0..=3.0).contains(&integral), "integral {integral}");
        }
        assert_eq!(rig.engine.snapshot()[0].integral, 3.0);

        rig.engine.set_pid_params(0, 0.0, 1.0, 0.0, 1.0).unwrap();
        assert_eq!(rig.engine.snapshot()[0].integral, 1.0);
    }

    #[test]
    fn disconnected_sensor_leaves_state_untouched() {
        let rig = rig();
        rig.engine.set_pid_params(0, 1.0, 1.0, 1.0, 10.0).unwrap();
        rig.publisher.publish(0, 2.0).unwrap();
        rig.publisher.publish(1, 2.0).unwrap();
        rig.engine.set_targets(&[8.0, 8.0]).unwrap();
        let t0 = Instant::now();
        rig.engine.tick_at(t0);
        rig.engine.tick_at(t0 + Duration::from_millis(10));
        let before = rig.engine.snapshot();

        rig.status.set(crate::connection::Endpoint::Sensor, ConnectionState::Disconnected);
        let report = rig.engine.tick_at(t0 + Duration::from_millis(20));
        assert!(report.sent.is_empty());
        assert_eq!(report.skipped, 2);
        assert_eq!(rig.engine.snapshot(), before);
    }

    #[test]
    fn output_is_clamped_to_target_range() {
        let rig = rig();
        rig.engine.set_pid_params(0, 1000.0, 0.0, 0.0, 0.0).unwrap();
        rig.publisher.publish(0, 0.0).unwrap();
        rig.publisher.publish(1, 0.0).unwrap();
        rig.engine.set_targets(&[1000.0, 1.0]).unwrap();

        let report = rig.engine.tick();
        assert_eq!(report.sent[0].command, i16::MAX);
    }

    #[test]
    fn write_failures_are_counted_not_fatal() {
        let rig = rig();
        rig.publisher.publish(0, 0.0).unwrap();
        rig.publisher.publish(1, 0.0).unwrap();
        rig.engine.set_targets(&[4.0, 4.0]).unwrap();
        rig.stage.set_fail_writes(true);

        let report = rig.engine.tick();
        assert_eq!(report.failed, 2);

        rig.stage.set_fail_writes(false);
        assert_eq!(rig.engine.tick().sent.len(), 2);
    }

    #[test]
    fn halt_all_idles_and_zeroes() {
        let rig = rig();
        rig.engine.set_pid_params(0, 0.0, 1.0, 0.0, 10.0).unwrap();
        rig.publisher.publish(0, 0.0).unwrap();
        rig.publisher.publish(1, 0.0).unwrap();
        rig.engine.set_targets(&[5.0, 5.0]).unwrap();
        let t0 = Instant::now();
        rig.engine.tick_at(t0);
        rig.engine.tick_at(t0 + Duration::from_millis(200));
        assert!(rig.engine.snapshot()[0].integral > 0.0);

        rig.engine.halt_all();
        for axis in rig.engine.snapshot() {
            assert_eq!(axis.mode, AxisMode::Idle);
            assert_eq!(axis.integral, 0.0);
            assert_eq!(axis.prev_error, None);
        }
        assert!(rig.engine.tick().sent.is_empty());
    }

    #[test]
    fn unknown_axis_and_bad_gains() {
        let rig = rig();
        assert!(matches!(
            rig.engine.set_pid_params(2, 1.0, 0.0, 0.0, 1.0),
            Err(StageError::UnknownAxis(2))
        ));
        assert!(matches!(
            rig.engine.set_pid_params(0, f64::NAN, 0.0, 0.0, 1.0),
            Err(StageError::InvalidGains(_))
        ));
        assert_eq!(rig.engine.snapshot()[0].gains, PidGains::default());
    }
}

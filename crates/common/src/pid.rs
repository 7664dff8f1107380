use serde::{Deserialize, Serialize};

use crate::error::{StageError, StageResult};

/// Gain set for one axis. Applied as a whole, never field by field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Integral accumulator is clamped to `[-i_lim, i_lim]`.
    pub i_lim: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.0,
            kd: 0.0,
            i_lim: 100.0,
        }
    }
}

impl PidGains {
    pub fn new(kp: f64, ki: f64, kd: f64, i_lim: f64) -> Self {
        Self { kp, ki, kd, i_lim }
    }

    pub fn validate(&self) -> StageResult<()> {
        if !(self.kp.is_finite() && self.ki.is_finite() && self.kd.is_finite()) {
            return Err(StageError::InvalidGains(format!(
                "gains must be finite (kp={}, ki={}, kd={})",
                self.kp, self.ki, self.kd
            )));
        }
        if !self.i_lim.is_finite() || self.i_lim < 0.0 {
            return Err(StageError::InvalidGains(format!(
                "integral limit must be a non-negative number, got {}",
                self.i_lim
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PidController {
    gains: PidGains,
    integral: f64,
    prev_error: Option<f64>,
}

impl PidController {
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            integral: 0.0,
            prev_error: None,
        }
    }

    /// Zero the integral and forget the previous error.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = None;
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    /// Swap in a new gain set; the integral is re-clamped to the new limit.
    pub fn set_gains(&mut self, gains: PidGains) {
        self.gains = gains;
        self.integral = self.integral.clamp(-gains.i_lim, gains.i_lim);
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn prev_error(&self) -> Option<f64> {
        self.prev_error
    }

    /// One PID step. `dt` is in seconds; a non-positive `dt` leaves the
    /// integral alone and yields no derivative.
    pub fn compute(&mut self, error: f64, dt: f64) -> f64 {
        let i_lim = self.gains.i_lim;

        if dt > 0.0 {
            self.integral += error * dt;
        }
        self.integral = self.integral.clamp(-i_lim, i_lim);

        let derivative = match self.prev_error {
            Some(prev) if dt > 0.0 => (error - prev) / dt,
            _ => 0.0,
        };

        self.prev_error = Some(error);

        (self.gains.kp * error) + (self.gains.ki * self.integral) + (self.gains.kd * derivative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proportional_only() {
        let mut pid = PidController::new(PidGains::new(2.0, 0.0, 0.0, 10.0));
        assert_eq!(pid.compute(5.0, 0.1), 10.0);
    }

    #[test]
    fn first_step_has_no_derivative_kick() {
        let mut pid = PidController::new(PidGains::new(0.0, 0.0, 1000.0, 10.0));
        assert_eq!(pid.compute(500.0, 0.01), 0.0);
        // (490 - 500) / 0.01 * 1000
        let out = pid.compute(490.0, 0.01);
        assert!((out + 1_000_000.0).abs() < 1e-6);
    }

    #[test]
    fn integral_stays_clamped() {
        let mut pid = PidController::new(PidGains::new(0.0, 1.0, 0.0, 2.5));
        for step in 0..200 {
            let error = if step < 100 { 50.0 } else { -75.0 };
            pid.compute(error, 0.05);
            assert!(pid.integral().abs() <= 2.5);
        }
        assert_eq!(pid.integral(), -2.5);
    }

    #[test]
    fn shrinking_limit_reclamps() {
        let mut pid = PidController::new(PidGains::new(0.0, 1.0, 0.0, 100.0));
        pid.compute(40.0, 1.0);
        assert_eq!(pid.integral(), 40.0);
        pid.set_gains(PidGains::new(0.0, 1.0, 0.0, 5.0));
        assert_eq!(pid.integral(), 5.0);
    }

    #[test]
    fn zero_dt_is_harmless() {
        let mut pid = PidController::new(PidGains::new(1.0, 1.0, 1.0, 10.0));
        pid.compute(1.0, 0.1);
        let out = pid.compute(3.0, 0.0);
        assert!(out.is_finite());
        assert_eq!(out, 3.0 + pid.integral());
    }

    #[test]
    fn rejects_bad_gains() {
        assert!(PidGains::new(f64::NAN, 0.0, 0.0, 1.0).validate().is_err());
        assert!(PidGains::new(1.0, 0.0, 0.0, -1.0).validate().is_err());
        assert!(PidGains::new(1.0, 0.0, 0.0, f64::INFINITY).validate().is_err());
        assert!(PidGains::new(1.0, 0.5, 0.1, 0.0).validate().is_ok());
    }
}

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{StageError, StageResult};
use crate::pid::PidGains;
use crate::AxisId;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    #[default]
    Threaded,
    Async,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Simulated,
    Jrk,
    Serial,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AxisConfig {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub i_lim: f64,
    /// PID output is clamped to this range before being rounded into a target.
    pub output_min: f64,
    pub output_max: f64,
}

impl Default for AxisConfig {
    fn default() -> Self {
        let gains = PidGains::default();
        Self {
            kp: gains.kp,
            ki: gains.ki,
            kd: gains.kd,
            i_lim: gains.i_lim,
            output_min: f64::from(i16::MIN),
            output_max: f64::from(i16::MAX),
        }
    }
}

impl AxisConfig {
    pub fn gains(&self) -> PidGains {
        PidGains::new(self.kp, self.ki, self.kd, self.i_lim)
    }
}

/// Marker in `jrk.devices` for an axis driven by a line on the serial port.
pub const LINE_AXIS: &str = "line";

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct JrkConfig {
    /// Jrk serial number per axis, or `"line"`.
    pub devices: Vec<String>,
    pub baud_rate: u32,
    pub poll_period_ms: u64,
}

impl Default for JrkConfig {
    fn default() -> Self {
        Self {
            devices: vec!["00425280".into(), "00425253".into()],
            baud_rate: 9600,
            poll_period_ms: 20,
        }
    }
}

impl JrkConfig {
    /// Jrk serial number per axis, `None` for a line axis. Indexed by axis.
    pub fn axis_devices(&self) -> Vec<Option<String>> {
        self.devices
            .iter()
            .map(|d| (d != LINE_AXIS).then(|| d.clone()))
            .collect()
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StageConfig {
    pub mode: RuntimeMode,
    pub backend: Backend,
    /// Port used when `connect` is issued without one.
    pub port: Option<String>,
    pub control_period_ms: u64,
    pub log_interval_ms: u64,
    pub discovery_period_ms: u64,
    pub attach_timeout_ms: u64,
    pub data_dir: PathBuf,
    pub file_name: String,
    /// Axis pair whose targets must share a strict sign.
    pub coupled_axes: Option<[AxisId; 2]>,
    pub axes: Vec<AxisConfig>,
    pub jrk: JrkConfig,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            mode: RuntimeMode::default(),
            backend: Backend::default(),
            port: None,
            control_period_ms: 10,
            log_interval_ms: 100,
            discovery_period_ms: 1000,
            attach_timeout_ms: 1000,
            data_dir: PathBuf::from("./data"),
            file_name: "StageData".to_string(),
            coupled_axes: Some([0, 1]),
            axes: vec![AxisConfig::default(), AxisConfig::default()],
            jrk: JrkConfig::default(),
        }
    }
}

pub fn load_config(path: impl AsRef<Path>) -> StageResult<StageConfig> {
    let content = fs::read_to_string(path)?;
    let config: StageConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

impl StageConfig {
    pub fn from_file(path: impl AsRef<Path>) -> StageResult<Self> {
        load_config(path)
    }

    pub fn axis_count(&self) -> usize {
        self.axes.len()
    }

    pub fn control_period(&self) -> Duration {
        Duration::from_millis(self.control_period_ms)
    }

    pub fn log_interval(&self) -> Duration {
        Duration::from_millis(self.log_interval_ms)
    }

    pub fn discovery_period(&self) -> Duration {
        Duration::from_millis(self.discovery_period_ms)
    }

    pub fn attach_timeout(&self) -> Duration {
        Duration::from_millis(self.attach_timeout_ms)
    }

    pub fn validate(&self) -> StageResult<()> {
        if self.axes.is_empty() {
            return Err(StageError::Config("at least one axis is required".into()));
        }
        for (name, value) in [
            ("control_period_ms", self.control_period_ms),
            ("log_interval_ms", self.log_interval_ms),
            ("discovery_period_ms", self.discovery_period_ms),
        ] {
            if value == 0 {
                return Err(StageError::Config(format!("{name} must be positive")));
            }
        }
        for (axis, cfg) in self.axes.iter().enumerate() {
            cfg.gains()
                .validate()
                .map_err(|e| StageError::Config(format!("axis {axis}: {e}")))?;
            let lo = f64::from(i16::MIN);
            let hi = f64::from(i16::MAX);
            if !(lo..=hi).contains(&cfg.output_min)
                || !(lo..=hi).contains(&cfg.output_max)
                || cfg.output_min > cfg.output_max
            {
                return Err(StageError::Config(format!(
                    "axis {axis}: output limits [{}, {}] must be an ordered range within i16",
                    cfg.output_min, cfg.output_max
                )));
            }
        }
        if let Some([a, b]) = self.coupled_axes {
            if a == b || a >= self.axes.len() || b >= self.axes.len() {
                return Err(StageError::Config(format!(
                    "coupled_axes [{a}, {b}] must name two distinct configured axes"
                )));
            }
        }
        if matches!(self.backend, Backend::Jrk | Backend::Serial)
            && self.jrk.devices.len() != self.axes.len()
        {
            return Err(StageError::Config(format!(
                "jrk.devices lists {} entries for {} axes",
                self.jrk.devices.len(),
                self.axes.len()
            )));
        }
        if self.file_name.trim().is_empty() {
            return Err(StageError::Config("file_name must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config: StageConfig = toml::from_str("").unwrap();
        assert_eq!(config, StageConfig::default());
        config.validate().unwrap();
    }

    #[test]
    fn parses_full_file() {
        let text = r#"
            mode = "async"
            backend = "jrk"
            port = "/dev/ttyACM0"
            control_period_ms = 5
            log_interval_ms = 20
            data_dir = "/tmp/stage"
            file_name = "run1"
            coupled_axes = [1, 0]

            [[axes]]
            kp = 2.0
            ki = 0.5
            i_lim = 50.0

            [[axes]]
            kp = 1.0
            kd = 0.1

            [jrk]
            devices = ["00425280", "line"]
            baud_rate = 115200
        "#;
        let config: StageConfig = toml::from_str(text).unwrap();
        config.validate().unwrap();
        assert_eq!(config.mode, RuntimeMode::Async);
        assert_eq!(config.backend, Backend::Jrk);
        assert_eq!(config.axes[0].gains(), PidGains::new(2.0, 0.5, 0.0, 50.0));
        assert_eq!(config.axes[1].output_max, 32767.0);
        assert_eq!(config.coupled_axes, Some([1, 0]));
        assert_eq!(
            config.jrk.axis_devices(),
            vec![Some("00425280".to_string()), None]
        );
    }

    #[test]
    fn rejects_inconsistent_settings() {
        let mut config = StageConfig::default();
        config.coupled_axes = Some([0, 2]);
        assert!(config.validate().is_err());

        let mut config = StageConfig::default();
        config.axes[1].i_lim = -1.0;
        assert!(config.validate().is_err());

        let mut config = StageConfig::default();
        config.log_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = StageConfig::default();
        config.axes[0].output_max = 40_000.0;
        assert!(config.validate().is_err());

        let mut config = StageConfig::default();
        config.backend = Backend::Serial;
        config.jrk.devices = vec!["00425253".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        assert!(matches!(
            load_config("/nonexistent/stage.toml"),
            Err(StageError::Io(_))
        ));
    }
}

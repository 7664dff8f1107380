//! Core of the two-axis linear stage controller. The threaded and async
//! runtimes that drive it live in their own crates.

pub mod actuator;
pub mod codec;
pub mod config;
pub mod connection;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod hardware;
pub mod logger;
pub mod orchestrator;
pub mod pid;
pub mod ports;
pub mod session;
pub mod system;
pub mod timeseries;

/// Axis index, `0..axis_count`.
pub type AxisId = usize;

pub use config::{load_config, StageConfig};
pub use connection::{ConnectionState, ConnectionStatus, Endpoint};
pub use diagnostics::SharedDiagnostics;
pub use engine::{AxisMode, AxisSnapshot, PidEngine, TickReport};
pub use error::{StageError, StageResult};
pub use logger::{DataLogger, LogChannel};
pub use system::{StageStatus, StageSystem};
pub use timeseries::{Sample, Timeseries};

//! Collaborator contracts for the physical stage and their implementations.

use std::time::Duration;

use crate::codec::TargetFrame;
use crate::error::StageResult;
use crate::feedback::FeedbackPublisher;
use crate::AxisId;

pub mod jrk;
pub mod serial;
pub mod simulated;

pub use jrk::{JrkCli, JrkFeedbackSensor};
pub use serial::{SerialFrameLink, SerialPortLister};
pub use simulated::{SimulatedSensor, SimulatedStage, SimulatedTransport};

/// Position sensor that pushes readings as they arrive.
pub trait SensorDevice: Send {
    /// Attach within `timeout` and start publishing through `publisher`.
    fn attach(&mut self, timeout: Duration, publisher: FeedbackPublisher) -> StageResult<()>;

    /// Stop publishing. Must be safe to call when not attached.
    fn detach(&mut self);
}

/// Motor-controller link.
pub trait ActuatorTransport: Send {
    fn open(&mut self, port: &str) -> StageResult<()>;

    /// Must be safe to call when not open.
    fn close(&mut self);

    fn write_target(&mut self, axis: AxisId, frame: TargetFrame) -> StageResult<()>;

    fn scaled_feedback(&mut self, axis: AxisId) -> StageResult<f64>;
}

/// Source of the serial ports currently present on the host.
pub trait PortLister: Send {
    fn list(&mut self) -> StageResult<Vec<String>>;
}

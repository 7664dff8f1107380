use std::sync::Arc;

use parking_lot::Mutex;

use crate::codec::{self, TargetFrame};
use crate::connection::{ConnectionStatus, Endpoint};
use crate::error::{StageError, StageResult};
use crate::hardware::ActuatorTransport;
use crate::AxisId;

/// Write side of the stage: encodes targets and hands them to the transport.
///
/// Sends and close share one lock, so closing waits for an in-flight write
/// instead of pulling the port out from under it.
pub struct ActuatorSink {
    transport: Mutex<Box<dyn ActuatorTransport>>,
    status: Arc<ConnectionStatus>,
}

impl ActuatorSink {
    pub fn new(transport: Box<dyn ActuatorTransport>, status: Arc<ConnectionStatus>) -> Self {
        Self {
            transport: Mutex::new(transport),
            status,
        }
    }

    pub(crate) fn open(&self, port: &str) -> StageResult<()> {
        self.transport.lock().open(port)
    }

    pub(crate) fn close(&self) {
        self.transport.lock().close();
    }

    /// Best-effort write of one target. Returns the frame that went out.
    pub fn send(&self, axis: AxisId, target: i16) -> StageResult<TargetFrame> {
        let frame = codec::encode_i16(target);
        let mut transport = self.transport.lock();
        if !self.status.is_connected(Endpoint::Actuator) {
            return Err(StageError::NotConnected);
        }
        transport.write_target(axis, frame)?;
        Ok(frame)
    }

    /// Position as reported by the motor controller itself.
    pub fn scaled_feedback(&self, axis: AxisId) -> StageResult<f64> {
        let mut transport = self.transport.lock();
        if !self.status.is_connected(Endpoint::Actuator) {
            return Err(StageError::NotConnected);
        }
        transport.scaled_feedback(axis)
    }
}

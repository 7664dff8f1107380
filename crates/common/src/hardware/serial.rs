use std::io::Write;
use std::time::Duration;

use serialport::SerialPort;
use tracing::{info, trace};

use super::{ActuatorTransport, PortLister};
use crate::codec::TargetFrame;
use crate::error::{StageError, StageResult};
use crate::AxisId;

/// High bit marks the command byte; the three data bytes never carry it.
const SET_TARGET: u8 = 0x80;

/// Raw frame link: `[0x80 | axis, b0, b1, b2]` per target.
pub struct SerialFrameLink {
    baud_rate: u32,
    timeout: Duration,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialFrameLink {
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            timeout: Duration::from_millis(100),
            port: None,
        }
    }
}

/// Build the on-wire bytes for one target.
pub fn frame_bytes(axis: AxisId, frame: TargetFrame) -> StageResult<[u8; 4]> {
    let address = u8::try_from(axis)
        .ok()
        .filter(|a| *a <= 0x7F)
        .ok_or(StageError::UnknownAxis(axis))?;
    Ok([SET_TARGET | address, frame[0], frame[1], frame[2]])
}

impl ActuatorTransport for SerialFrameLink {
    fn open(&mut self, port: &str) -> StageResult<()> {
        let handle = serialport::new(port, self.baud_rate)
            .timeout(self.timeout)
            .open()
            .map_err(|e| StageError::Connection(format!("failed to open '{port}': {e}")))?;
        info!(port, baud = self.baud_rate, "serial link open");
        self.port = Some(handle);
        Ok(())
    }

    fn close(&mut self) {
        self.port = None;
    }

    fn write_target(&mut self, axis: AxisId, frame: TargetFrame) -> StageResult<()> {
        let port = self.port.as_mut().ok_or(StageError::NotConnected)?;
        let bytes = frame_bytes(axis, frame)?;
        trace!(axis, ?bytes, "writing frame");
        port.write_all(&bytes)
            .map_err(|e| StageError::Transport(e.to_string()))
    }

    fn scaled_feedback(&mut self, _axis: AxisId) -> StageResult<f64> {
        Err(StageError::Transport(
            "frame link does not report feedback".into(),
        ))
    }
}

/// Lists ports through the OS enumeration.
#[derive(Debug, Default)]
pub struct SerialPortLister;

impl PortLister for SerialPortLister {
    fn list(&mut self) -> StageResult<Vec<String>> {
        let ports = serialport::available_ports()?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;

    #[test]
    fn only_the_command_byte_has_the_high_bit() {
        let bytes = frame_bytes(1, codec::encode_i16(-1)).unwrap();
        assert_eq!(bytes, [0x81, 0x7F, 0x7F, 0x03]);
        assert!(bytes[1..].iter().all(|b| *b & 0x80 == 0));
    }

    #[test]
    fn axis_must_fit_the_address_bits() {
        assert!(frame_bytes(127, [0, 0, 0]).is_ok());
        assert!(matches!(
            frame_bytes(128, [0, 0, 0]),
            Err(StageError::UnknownAxis(128))
        ));
    }
}

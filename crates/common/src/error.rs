//! Error type shared by every stage component.
//!
//! Configuration mistakes (bad gains, bad targets, bad codec input) are
//! returned synchronously with no state change. Hardware errors
//! (`Transport`, `NotConnected`) are absorbed by the worker that hit them and
//! only cost a single tick.

use thiserror::Error;

use crate::AxisId;

/// Convenience alias for results using the stage error type.
pub type StageResult<T> = std::result::Result<T, StageError>;

#[derive(Error, Debug)]
pub enum StageError {
    #[error("value {0} does not fit in a signed 16-bit target")]
    OutOfRange(i64),

    #[error("malformed target frame {0:02x?}")]
    MalformedFrame([u8; 3]),

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("invalid PID parameters: {0}")]
    InvalidGains(String),

    #[error("invalid logging interval: {0} ms")]
    InvalidInterval(u64),

    #[error("unknown axis {0}")]
    UnknownAxis(AxisId),

    #[error("sample at {next} ms precedes last sample at {last} ms")]
    NonMonotonic { last: u64, next: u64 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("hardware not connected")]
    NotConnected,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("worker stopped before replying")]
    WorkerStopped,
}

impl From<toml::de::Error> for StageError {
    fn from(err: toml::de::Error) -> Self {
        StageError::Config(err.to_string())
    }
}

impl From<serialport::Error> for StageError {
    fn from(err: serialport::Error) -> Self {
        StageError::Transport(err.to_string())
    }
}

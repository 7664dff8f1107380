use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

/// Lifecycle of one hardware endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Endpoint {
    Sensor,
    Actuator,
}

/// Connection state of the sensor and actuator endpoints.
///
/// Only the orchestrator writes; every worker re-reads before touching
/// hardware and treats a flip to disconnected as a no-op.
#[derive(Debug)]
pub struct ConnectionStatus {
    sensor: AtomicU8,
    actuator: AtomicU8,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            sensor: AtomicU8::new(ConnectionState::Disconnected.as_u8()),
            actuator: AtomicU8::new(ConnectionState::Disconnected.as_u8()),
        }
    }
}

impl ConnectionStatus {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, endpoint: Endpoint) -> &AtomicU8 {
        match endpoint {
            Endpoint::Sensor => &self.sensor,
            Endpoint::Actuator => &self.actuator,
        }
    }

    pub fn get(&self, endpoint: Endpoint) -> ConnectionState {
        ConnectionState::from_u8(self.slot(endpoint).load(Ordering::Acquire))
    }

    pub fn is_connected(&self, endpoint: Endpoint) -> bool {
        self.get(endpoint) == ConnectionState::Connected
    }

    /// Both endpoints up.
    pub fn is_online(&self) -> bool {
        self.is_connected(Endpoint::Sensor) && self.is_connected(Endpoint::Actuator)
    }

    pub(crate) fn set(&self, endpoint: Endpoint, state: ConnectionState) {
        self.slot(endpoint).store(state.as_u8(), Ordering::Release);
    }

    pub(crate) fn set_both(&self, state: ConnectionState) {
        self.set(Endpoint::Actuator, state);
        self.set(Endpoint::Sensor, state);
    }
}

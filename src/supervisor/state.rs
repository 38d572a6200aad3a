use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection lifecycle as seen by collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No peer configured, or shut down
    Idle,
    /// Discovery scan in progress while idle
    Scanning,
    Connecting,
    Connected,
    Disconnected,
    /// Local radio is off; nothing is attempted until it comes back
    RadioOff,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Scanning => "scanning",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::RadioOff => "radio_off",
        };
        f.write_str(name)
    }
}

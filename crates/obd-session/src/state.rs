//! Session states and the events published on transitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of an adapter session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Disconnected,
    TransportConnected,
    DeviceIdentified,
    ProtocolDetected,
    SessionActive,
    Streaming,
    ErrorRecovery,
    Reconnecting,
}

impl SessionState {
    /// Only these states route commands to the adapter
    pub fn accepts_commands(&self) -> bool {
        matches!(self, SessionState::SessionActive | SessionState::Streaming)
    }

    /// Numeric code for the state gauge
    pub fn code(&self) -> u8 {
        match self {
            SessionState::Disconnected => 0,
            SessionState::TransportConnected => 1,
            SessionState::DeviceIdentified => 2,
            SessionState::ProtocolDetected => 3,
            SessionState::SessionActive => 4,
            SessionState::Streaming => 5,
            SessionState::ErrorRecovery => 6,
            SessionState::Reconnecting => 7,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::TransportConnected => "transport_connected",
            SessionState::DeviceIdentified => "device_identified",
            SessionState::ProtocolDetected => "protocol_detected",
            SessionState::SessionActive => "session_active",
            SessionState::Streaming => "streaming",
            SessionState::ErrorRecovery => "error_recovery",
            SessionState::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Published on the session's broadcast channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The state machine moved
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// The device profile was replaced or its health score moved
    ProfileUpdated { health_score: u8 },
}

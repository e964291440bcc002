//! Connection status
//!
//! Tracks where a session is in its lifecycle. Only the session itself moves
//! between states; every other component observes.

use serde::{Deserialize, Serialize};

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// Initial connection in progress
    Connecting,
    /// Link established, publish and request are allowed
    Connected,
    /// Link lost, the session is trying to restore it
    Reconnecting,
    /// Link lost for good, or the session was closed
    Disconnected,
}

impl ConnectionStatus {
    /// Whether publish and request are currently allowed
    pub fn is_connected(self) -> bool {
        self == ConnectionStatus::Connected
    }

    /// Whether the session can still come back without a new `connect`
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connecting
                | ConnectionStatus::Connected
                | ConnectionStatus::Reconnecting
        )
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(self, next: ConnectionStatus) -> bool {
        use ConnectionStatus::*;

        matches!(
            (self, next),
            (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Reconnecting)
                | (Connected, Disconnected)
                | (Reconnecting, Connected)
                | (Reconnecting, Disconnected)
        )
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

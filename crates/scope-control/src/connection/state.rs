//! Connection states and the transition table

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    /// Closed by the user
    Disconnected,
    /// Failed; stays here until `retry()` or `connect()`
    Error,
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connect,
    Retry,
    Negotiated,
    NegotiationFailed,
    /// Stream or channel lost while connected
    ConnectionLost { reconnect: bool },
    RetriesExhausted,
    Disconnect,
}

impl ConnectionState {
    /// Next state for `event`, or `None` if the event is not accepted here
    pub fn apply(self, event: ConnectionEvent) -> Option<ConnectionState> {
        use ConnectionEvent as E;
        use ConnectionState as S;

        match (self, event) {
            (S::Idle | S::Disconnected | S::Error, E::Connect) => Some(S::Connecting),
            (S::Disconnected | S::Error, E::Retry) => Some(S::Connecting),

            (S::Connecting | S::Reconnecting, E::Negotiated) => Some(S::Connected),
            (S::Connecting, E::NegotiationFailed) => Some(S::Error),
            // A failed attempt leaves room for the next one
            (S::Reconnecting, E::NegotiationFailed) => Some(S::Reconnecting),
            (S::Reconnecting, E::RetriesExhausted) => Some(S::Error),

            (S::Connected, E::ConnectionLost { reconnect: true }) => Some(S::Reconnecting),
            (S::Connected, E::ConnectionLost { reconnect: false }) => Some(S::Error),

            (S::Connecting | S::Connected | S::Reconnecting | S::Error, E::Disconnect) => {
                Some(S::Disconnected)
            }

            _ => None,
        }
    }

    /// A negotiation may be in flight
    pub fn is_busy(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Reconnecting)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

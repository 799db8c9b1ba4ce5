//! Error types for the Scope client
use thiserror::Error;

/// Remote API errors
#[derive(Error, Debug)]
pub enum ApiError {
    /// Transport-level failure (DNS, connect, TLS, timeout)
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("HTTP {status} from {endpoint}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// Body could not be decoded
    #[error("Invalid response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    /// Server answered with an empty or `null` body
    #[error("Empty response from {0}")]
    Empty(String),

    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

/// Peer connection backend errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PeerError {
    #[error("WebRTC error: {0}")]
    Backend(String),

    #[error("Peer connection is closed")]
    Closed,

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

/// Session negotiation errors
#[derive(Error, Debug)]
pub enum NegotiationError {
    #[error("Failed to fetch ICE servers: {0}")]
    IceServers(#[source] ApiError),

    #[error("Peer connection setup failed: {0}")]
    PeerSetup(#[source] PeerError),

    #[error("Failed to create local description: {0}")]
    LocalDescription(#[source] PeerError),

    #[error("Server rejected the offer: {0}")]
    OfferRejected(#[source] ApiError),

    #[error("Server returned no answer")]
    NoAnswer,

    #[error("Failed to apply remote description: {0}")]
    RemoteDescription(#[source] PeerError),

    #[error("Negotiation cancelled")]
    Cancelled,
}

/// Runtime connection failures recorded by the controller
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("Connection failed: {0}")]
    Negotiation(String),

    #[error("Media stream stopped")]
    StreamStopped,

    #[error("Control channel closed")]
    ChannelClosed,

    #[error("Reconnection failed after {0} attempts")]
    ReconnectExhausted(u32),
}

impl From<&NegotiationError> for ConnectionError {
    fn from(e: &NegotiationError) -> Self {
        ConnectionError::Negotiation(e.to_string())
    }
}

/// Parameter send errors. Never affect connection state.
#[derive(Error, Debug)]
pub enum ParameterSendError {
    #[error("Control channel is not open")]
    ChannelNotOpen,

    #[error("Failed to serialize parameters: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to send parameters: {0}")]
    Transport(#[source] PeerError),
}

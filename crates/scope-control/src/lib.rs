//! MetaDJ Scope Control - connection to a Scope generation server
//!
//! This crate talks to the remote Scope server and keeps a live session up:
//! - **API**: REST client for health, ICE servers, offers and pipelines
//! - **WebRTC**: offer/answer negotiation with ICE trickling
//! - **Connection**: lifecycle state machine with reconnect and backoff
//! - **Sender**: rate-limited parameter updates over the control channel
//! - **Soundscape**: audio analysis ticks to parameters, end to end
//!
//! ## Feature Flags
//!
//! - `webrtc`: webrtc-rs peer connection backend (requires `webrtc`)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scope_control::{ConnectionConfig, ConnectionController, ScopeClient};
//! use scope_control::webrtc::{ReceiveVideo, SessionNegotiator};
//! # use scope_control::webrtc::PeerFactory;
//! # async fn demo(factory: std::sync::Arc<dyn PeerFactory>) -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//!
//! let client = Arc::new(ScopeClient::new("http://localhost:8000")?);
//! let negotiator = SessionNegotiator::new(client, factory, Arc::new(ReceiveVideo));
//! let controller = ConnectionController::new(Arc::new(negotiator), ConnectionConfig::default());
//! controller.connect().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`api`] - Scope REST API types and client
//! - [`webrtc`] - peer abstraction, negotiator and sessions
//! - [`connection`] - connection lifecycle controller
//! - [`sender`] - parameter sender
//! - [`soundscape`] - soundscape driver
//! - [`error`] - Error types

#![allow(missing_docs)]

/// Scope REST API
pub mod api;
/// Connection lifecycle
pub mod connection;
/// Error types
pub mod error;
/// Parameter sending over the control channel
pub mod sender;
/// Analysis-driven parameter updates
pub mod soundscape;
/// WebRTC negotiation
pub mod webrtc;

// Re-exports
pub use api::{client::ScopeClient, ScopeApi};
pub use connection::{
    ConnectionConfig, ConnectionController, ConnectionObserver, ConnectionState,
    DisconnectReason, ReconnectPolicy,
};
pub use error::{ApiError, ConnectionError, NegotiationError, ParameterSendError, PeerError};
pub use sender::{ChannelProvider, ParameterSender, SendOutcome};
pub use soundscape::SoundscapeDriver;

#[cfg(feature = "webrtc")]
pub use webrtc::rtc::RtcPeerFactory;

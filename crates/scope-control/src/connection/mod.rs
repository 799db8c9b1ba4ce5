//! Connection lifecycle
//!
//! - [`state`] - states, events and the transition table
//! - [`controller`] - the controller owning the session, retries and teardown

pub mod controller;
pub mod state;

pub use controller::{
    ConnectionConfig, ConnectionController, ConnectionObserver, DisconnectReason,
    ReconnectPolicy,
};
pub use state::{ConnectionEvent, ConnectionState};

//! WebRTC session negotiation
//!
//! The peer connection is abstracted behind [`PeerConnection`],
//! [`ControlChannel`] and [`MediaTrack`] so negotiation logic does not depend
//! on a particular WebRTC stack. Backends report asynchronous happenings
//! (ICE candidates, tracks, channel state) as [`PeerEvent`]s.
//!
//! - [`ice`] - pending ICE candidate queue
//! - [`negotiator`] - offer/answer/ICE exchange
//! - [`session`] - a negotiated session and its event pump
//! - `rtc` - webrtc-rs backend (requires the `webrtc` feature)

pub mod ice;
pub mod negotiator;
pub mod session;

#[cfg(feature = "webrtc")]
pub mod rtc;

pub use ice::IceTrickle;
pub use negotiator::{CancelSignal, Negotiate, NegotiateOptions, SessionNegotiator};
pub use session::{Session, SessionEvent};

use crate::api::{IceCandidateInit, IceServer};
use crate::error::PeerError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Kind of media carried by a track or transceiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransceiverDirection {
    SendRecv,
    SendOnly,
    RecvOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl SdpType {
    pub fn as_str(self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
            SdpType::Pranswer => "pranswer",
            SdpType::Rollback => "rollback",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "offer" => Some(SdpType::Offer),
            "answer" => Some(SdpType::Answer),
            "pranswer" => Some(SdpType::Pranswer),
            "rollback" => Some(SdpType::Rollback),
            _ => None,
        }
    }
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An SDP blob with its type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

/// Peer connection state as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Something the peer connection reported
#[derive(Clone)]
pub enum PeerEvent {
    /// A local ICE candidate was gathered
    IceCandidate(IceCandidateInit),
    IceGatheringComplete,
    ConnectionStateChanged(PeerConnectionState),
    /// An inbound media track arrived
    Track(Arc<dyn MediaTrack>),
    /// An inbound track ended; carries its id
    TrackEnded(String),
    ChannelOpen,
    ChannelClosed,
    ChannelMessage(String),
}

impl fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerEvent::IceCandidate(c) => f.debug_tuple("IceCandidate").field(c).finish(),
            PeerEvent::IceGatheringComplete => f.write_str("IceGatheringComplete"),
            PeerEvent::ConnectionStateChanged(s) => {
                f.debug_tuple("ConnectionStateChanged").field(s).finish()
            }
            PeerEvent::Track(t) => f.debug_tuple("Track").field(&t.id()).finish(),
            PeerEvent::TrackEnded(id) => f.debug_tuple("TrackEnded").field(id).finish(),
            PeerEvent::ChannelOpen => f.write_str("ChannelOpen"),
            PeerEvent::ChannelClosed => f.write_str("ChannelClosed"),
            PeerEvent::ChannelMessage(m) => f.debug_tuple("ChannelMessage").field(m).finish(),
        }
    }
}

/// A local or remote media track
#[async_trait]
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> String;

    fn kind(&self) -> TrackKind;

    /// Stop the track. Idempotent; a no-op for remote tracks.
    async fn stop(&self);
}

/// Named data channel carrying control messages
#[async_trait]
pub trait ControlChannel: Send + Sync {
    fn label(&self) -> String;

    fn is_open(&self) -> bool;

    async fn send_text(&self, text: &str) -> Result<(), PeerError>;

    /// Close the channel. Idempotent.
    async fn close(&self);
}

/// One peer connection
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_transceiver(
        &self,
        kind: TrackKind,
        direction: TransceiverDirection,
    ) -> Result<(), PeerError>;

    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), PeerError>;

    async fn create_control_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn ControlChannel>, PeerError>;

    async fn create_offer(&self) -> Result<SessionDescription, PeerError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError>;

    async fn local_description(&self) -> Option<SessionDescription>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError>;

    /// Hand over the event stream. Only the first call returns `Some`.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>>;

    /// Close the connection. Idempotent.
    async fn close(&self);
}

/// Creates peer connections for a given ICE configuration
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(&self, ice_servers: &[IceServer]) -> Result<Arc<dyn PeerConnection>, PeerError>;
}

/// Caller hook run on a fresh peer connection before the offer is created
///
/// Adds transceivers and local tracks; returns the local tracks so the
/// session can stop them on teardown.
#[async_trait]
pub trait PeerSetup: Send + Sync {
    async fn setup(&self, peer: &dyn PeerConnection) -> Result<Vec<Arc<dyn MediaTrack>>, PeerError>;
}

/// Receive-only video, no local tracks
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceiveVideo;

#[async_trait]
impl PeerSetup for ReceiveVideo {
    async fn setup(&self, peer: &dyn PeerConnection) -> Result<Vec<Arc<dyn MediaTrack>>, PeerError> {
        peer.add_transceiver(TrackKind::Video, TransceiverDirection::RecvOnly)
            .await?;
        Ok(Vec::new())
    }
}

/// Send the given local tracks and receive video back
pub struct SendTracks {
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl SendTracks {
    pub fn new(tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self { tracks }
    }
}

#[async_trait]
impl PeerSetup for SendTracks {
    async fn setup(&self, peer: &dyn PeerConnection) -> Result<Vec<Arc<dyn MediaTrack>>, PeerError> {
        for track in &self.tracks {
            peer.add_track(track.clone()).await?;
        }
        if !self.tracks.iter().any(|t| t.kind() == TrackKind::Video) {
            peer.add_transceiver(TrackKind::Video, TransceiverDirection::RecvOnly)
                .await?;
        }
        Ok(self.tracks.clone())
    }
}

//! webrtc-rs backend

use super::{
    ControlChannel, MediaTrack, PeerConnection, PeerConnectionState, PeerEvent, PeerFactory,
    SdpType, SessionDescription, TrackKind, TransceiverDirection,
};
use crate::api::{IceCandidateInit, IceServer};
use crate::error::PeerError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_remote::TrackRemote;

fn backend(e: webrtc::Error) -> PeerError {
    PeerError::Backend(e.to_string())
}

impl From<RTCPeerConnectionState> for PeerConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
            RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
            RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
            _ => PeerConnectionState::New,
        }
    }
}

fn codec_type(kind: TrackKind) -> RTPCodecType {
    match kind {
        TrackKind::Audio => RTPCodecType::Audio,
        TrackKind::Video => RTPCodecType::Video,
    }
}

fn direction(direction: TransceiverDirection) -> RTCRtpTransceiverDirection {
    match direction {
        TransceiverDirection::SendRecv => RTCRtpTransceiverDirection::Sendrecv,
        TransceiverDirection::SendOnly => RTCRtpTransceiverDirection::Sendonly,
        TransceiverDirection::RecvOnly => RTCRtpTransceiverDirection::Recvonly,
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, PeerError> {
    match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
        SdpType::Rollback => {
            return Err(PeerError::Unsupported("rollback descriptions".to_string()))
        }
    }
    .map_err(backend)
}

fn from_rtc(desc: RTCSessionDescription) -> SessionDescription {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        _ => SdpType::Offer,
    };
    SessionDescription {
        sdp_type,
        sdp: desc.sdp,
    }
}

/// Inbound track from the server
struct RemoteTrack {
    track: Arc<TrackRemote>,
}

#[async_trait]
impl MediaTrack for RemoteTrack {
    fn id(&self) -> String {
        self.track.id()
    }

    fn kind(&self) -> TrackKind {
        match self.track.kind() {
            RTPCodecType::Audio => TrackKind::Audio,
            _ => TrackKind::Video,
        }
    }

    async fn stop(&self) {}
}

/// Data channel wrapper
struct RtcControlChannel {
    channel: Arc<RTCDataChannel>,
}

#[async_trait]
impl ControlChannel for RtcControlChannel {
    fn label(&self) -> String {
        self.channel.label().to_string()
    }

    fn is_open(&self) -> bool {
        self.channel.ready_state() == RTCDataChannelState::Open
    }

    async fn send_text(&self, text: &str) -> Result<(), PeerError> {
        self.channel
            .send_text(text.to_string())
            .await
            .map(|_| ())
            .map_err(backend)
    }

    async fn close(&self) {
        if let Err(e) = self.channel.close().await {
            debug!("Data channel close: {}", e);
        }
    }
}

/// webrtc-rs peer connection
pub struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
}

impl RtcPeer {
    fn wire_callbacks(&self) {
        let tx = self.events_tx.clone();
        self.pc.on_ice_candidate(Box::new(move |candidate| {
            let tx = tx.clone();
            Box::pin(async move {
                let event = match candidate {
                    Some(c) => match c.to_json() {
                        Ok(init) => PeerEvent::IceCandidate(IceCandidateInit {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                        }),
                        Err(e) => {
                            warn!("Dropping unserializable ICE candidate: {}", e);
                            return;
                        }
                    },
                    None => PeerEvent::IceGatheringComplete,
                };
                let _ = tx.send(event);
            })
        }));

        let tx = self.events_tx.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                info!("Peer connection state changed: {}", state);
                let _ = tx.send(PeerEvent::ConnectionStateChanged(state.into()));
                Box::pin(async {})
            }));

        let tx = self.events_tx.clone();
        self.pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            info!("Remote {} track received: {}", track.kind(), track.id());
            let _ = tx.send(PeerEvent::Track(Arc::new(RemoteTrack { track })));
            Box::pin(async {})
        }));
    }
}

#[async_trait]
impl PeerConnection for RtcPeer {
    async fn add_transceiver(
        &self,
        kind: TrackKind,
        dir: TransceiverDirection,
    ) -> Result<(), PeerError> {
        self.pc
            .add_transceiver_from_kind(
                codec_type(kind),
                Some(RTCRtpTransceiverInit {
                    direction: direction(dir),
                    send_encodings: vec![],
                }),
            )
            .await
            .map(|_| ())
            .map_err(backend)
    }

    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), PeerError> {
        Err(PeerError::Unsupported(format!(
            "local track {} cannot be sent by this backend",
            track.id()
        )))
    }

    async fn create_control_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn ControlChannel>, PeerError> {
        let channel = self
            .pc
            .create_data_channel(label, None)
            .await
            .map_err(backend)?;

        let tx = self.events_tx.clone();
        channel.on_open(Box::new(move || {
            let _ = tx.send(PeerEvent::ChannelOpen);
            Box::pin(async {})
        }));
        let tx = self.events_tx.clone();
        channel.on_close(Box::new(move || {
            let _ = tx.send(PeerEvent::ChannelClosed);
            Box::pin(async {})
        }));
        let tx = self.events_tx.clone();
        channel.on_message(Box::new(move |msg| {
            if msg.is_string {
                let text = String::from_utf8_lossy(&msg.data).to_string();
                let _ = tx.send(PeerEvent::ChannelMessage(text));
            }
            Box::pin(async {})
        }));

        Ok(Arc::new(RtcControlChannel { channel }))
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        self.pc
            .create_offer(None)
            .await
            .map(from_rtc)
            .map_err(backend)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(backend)
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.pc.local_description().await.map(from_rtc)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(backend)
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>> {
        self.events_rx.lock().take()
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            debug!("Peer connection close: {}", e);
        }
    }
}

/// Builds [`RtcPeer`]s with the default codecs and interceptors
#[derive(Debug, Clone, Copy, Default)]
pub struct RtcPeerFactory;

#[async_trait]
impl PeerFactory for RtcPeerFactory {
    async fn create(&self, ice_servers: &[IceServer]) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(backend)?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(backend)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone().unwrap_or_default(),
                    credential: server.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(config).await.map_err(backend)?);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let peer = RtcPeer {
            pc,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        };
        peer.wire_callbacks();
        Ok(Arc::new(peer))
    }
}

//! In-memory fakes for the Scope API and the peer connection
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use scope_control::api::{
    HealthResponse, IceCandidateInit, IceServersResponse, OfferRequest, OfferResponse,
    PipelineLoadRequest, PipelineStatus, ScopeApi,
};
use scope_control::error::{ApiError, NegotiationError, PeerError};
use scope_control::webrtc::{
    CancelSignal, ControlChannel, MediaTrack, Negotiate, NegotiateOptions, PeerConnection,
    PeerConnectionState, PeerEvent, PeerFactory, SdpType, Session, SessionDescription, TrackKind,
    TransceiverDirection,
};
use scope_control::{ConnectionState, ConnectionObserver, DisconnectReason};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::Instant;

// --- Scope API ---

pub struct FakeApi {
    pub answer: Mutex<Option<OfferResponse>>,
    pub offers: Mutex<Vec<OfferRequest>>,
    pub candidate_calls: Mutex<Vec<(String, Vec<IceCandidateInit>)>>,
    /// Park offers until `release_offer` is notified
    pub hold_offer: AtomicBool,
    pub offer_received: Notify,
    pub release_offer: Notify,
    /// Park candidate PATCHes until `release_candidates` is notified
    pub hold_candidates: AtomicBool,
    pub release_candidates: Notify,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(Some(OfferResponse {
                sdp: "v=0 fake answer".to_string(),
                sdp_type: "answer".to_string(),
                session_id: "session-1".to_string(),
            })),
            offers: Mutex::new(Vec::new()),
            candidate_calls: Mutex::new(Vec::new()),
            hold_offer: AtomicBool::new(false),
            offer_received: Notify::new(),
            release_offer: Notify::new(),
            hold_candidates: AtomicBool::new(false),
            release_candidates: Notify::new(),
        })
    }

    /// Candidate strings per PATCH call
    pub fn candidate_batches(&self) -> Vec<Vec<String>> {
        self.candidate_calls
            .lock()
            .iter()
            .map(|(_, batch)| batch.iter().map(|c| c.candidate.clone()).collect())
            .collect()
    }
}

#[async_trait]
impl ScopeApi for FakeApi {
    async fn check_health(&self) -> Result<HealthResponse, ApiError> {
        Ok(HealthResponse {
            status: "ok".to_string(),
            version: None,
            gpu: None,
            vram: None,
        })
    }

    async fn get_ice_servers(&self) -> Result<IceServersResponse, ApiError> {
        Ok(IceServersResponse::default())
    }

    async fn create_webrtc_offer(&self, offer: &OfferRequest) -> Result<OfferResponse, ApiError> {
        self.offers.lock().push(offer.clone());
        self.offer_received.notify_one();
        if self.hold_offer.load(Ordering::SeqCst) {
            self.release_offer.notified().await;
        }
        let answer = self.answer.lock().clone();
        answer.ok_or_else(|| ApiError::Empty("/api/v1/webrtc/offer".to_string()))
    }

    async fn add_ice_candidates(
        &self,
        session_id: &str,
        candidates: &[IceCandidateInit],
    ) -> Result<(), ApiError> {
        self.candidate_calls
            .lock()
            .push((session_id.to_string(), candidates.to_vec()));
        if self.hold_candidates.load(Ordering::SeqCst) {
            self.release_candidates.notified().await;
        }
        Ok(())
    }

    async fn pipeline_status(&self) -> Result<PipelineStatus, ApiError> {
        Ok(PipelineStatus {
            status: "loaded".to_string(),
            pipeline_id: None,
            error: None,
        })
    }

    async fn load_pipeline(&self, _request: &PipelineLoadRequest) -> Result<(), ApiError> {
        Ok(())
    }
}

// --- Peer connection ---

#[derive(Default)]
pub struct FakeTrack {
    pub id: String,
    pub kind: Option<TrackKind>,
    pub stopped: AtomicBool,
}

impl FakeTrack {
    pub fn video(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            kind: Some(TrackKind::Video),
            stopped: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl MediaTrack for FakeTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> TrackKind {
        self.kind.unwrap_or(TrackKind::Video)
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

pub struct FakeChannel {
    pub label: String,
    pub open: AtomicBool,
    pub sent: Mutex<Vec<String>>,
}

impl FakeChannel {
    pub fn new(label: &str, open: bool) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            open: AtomicBool::new(open),
            sent: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ControlChannel for FakeChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: &str) -> Result<(), PeerError> {
        if !self.is_open() {
            return Err(PeerError::Closed);
        }
        self.sent.lock().push(text.to_string());
        Ok(())
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

pub struct FakePeer {
    events_tx: Mutex<Option<mpsc::UnboundedSender<PeerEvent>>>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
    pub transceivers: Mutex<Vec<(TrackKind, TransceiverDirection)>>,
    pub channels: Mutex<Vec<Arc<FakeChannel>>>,
    pub local: Mutex<Option<SessionDescription>>,
    pub remote: Mutex<Option<SessionDescription>>,
    pub closed: AtomicBool,
}

impl FakePeer {
    pub fn new() -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            events_tx: Mutex::new(Some(events_tx)),
            events_rx: Mutex::new(Some(events_rx)),
            transceivers: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn emit(&self, event: PeerEvent) {
        if let Some(tx) = self.events_tx.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Drop the event sender so the backend's stream ends
    pub fn end_events(&self) {
        self.events_tx.lock().take();
    }

    pub fn emit_candidate(&self, candidate: &str) {
        self.emit(PeerEvent::IceCandidate(IceCandidateInit::new(
            candidate,
            Some("0"),
            Some(0),
        )));
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn add_transceiver(
        &self,
        kind: TrackKind,
        direction: TransceiverDirection,
    ) -> Result<(), PeerError> {
        self.transceivers.lock().push((kind, direction));
        Ok(())
    }

    async fn add_track(&self, _track: Arc<dyn MediaTrack>) -> Result<(), PeerError> {
        Ok(())
    }

    async fn create_control_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn ControlChannel>, PeerError> {
        let channel = FakeChannel::new(label, true);
        self.channels.lock().push(channel.clone());
        Ok(channel)
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        Ok(SessionDescription {
            sdp_type: SdpType::Offer,
            sdp: "v=0 fake offer".to_string(),
        })
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        *self.local.lock() = Some(desc);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        *self.remote.lock() = Some(desc);
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>> {
        self.events_rx.lock().take()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeFactory {
    pub peers: Mutex<Vec<Arc<FakePeer>>>,
    pub created: Notify,
}

impl FakeFactory {
    pub fn last_peer(&self) -> Option<Arc<FakePeer>> {
        self.peers.lock().last().cloned()
    }
}

#[async_trait]
impl PeerFactory for FakeFactory {
    async fn create(
        &self,
        _ice_servers: &[scope_control::api::IceServer],
    ) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let peer = FakePeer::new();
        self.peers.lock().push(peer.clone());
        self.created.notify_one();
        Ok(peer)
    }
}

// --- Scripted negotiator for controller tests ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Succeed,
    Fail,
    /// Block until cancelled
    Hang,
}

/// Negotiator whose outcomes are scripted; unscripted calls fail
pub struct FakeNegotiator {
    pub api: Arc<FakeApi>,
    pub script: Mutex<VecDeque<Script>>,
    pub calls: Mutex<Vec<Instant>>,
    pub options: Mutex<Vec<NegotiateOptions>>,
    pub peers: Mutex<Vec<Arc<FakePeer>>>,
    pub started: Notify,
    call_count: AtomicUsize,
}

impl FakeNegotiator {
    pub fn new(script: impl IntoIterator<Item = Script>) -> Arc<Self> {
        Arc::new(Self {
            api: FakeApi::new(),
            script: Mutex::new(script.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
            options: Mutex::new(Vec::new()),
            peers: Mutex::new(Vec::new()),
            started: Notify::new(),
            call_count: AtomicUsize::new(0),
        })
    }

    pub fn push(&self, script: Script) {
        self.script.lock().push_back(script);
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().clone()
    }

    pub fn last_peer(&self) -> Option<Arc<FakePeer>> {
        self.peers.lock().last().cloned()
    }
}

#[async_trait]
impl Negotiate for FakeNegotiator {
    async fn negotiate(
        &self,
        options: &NegotiateOptions,
        cancel: &CancelSignal,
    ) -> Result<Session, NegotiationError> {
        let n = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.calls.lock().push(Instant::now());
        self.options.lock().push(options.clone());
        self.started.notify_one();

        let script = self.script.lock().pop_front().unwrap_or(Script::Fail);
        match script {
            Script::Succeed => {
                let peer = FakePeer::new();
                self.peers.lock().push(peer.clone());
                let events = peer
                    .take_events()
                    .ok_or(NegotiationError::NoAnswer)?;
                let channel = match &options.control_channel {
                    Some(label) => Some(
                        peer.create_control_channel(label)
                            .await
                            .map_err(NegotiationError::PeerSetup)?,
                    ),
                    None => None,
                };
                Ok(
                    Session::new(format!("session-{}", n), peer, self.api.clone(), events)
                        .with_channel(channel),
                )
            }
            Script::Fail => Err(NegotiationError::NoAnswer),
            Script::Hang => {
                cancel.cancelled().await;
                Err(NegotiationError::Cancelled)
            }
        }
    }
}

/// Break the peer the way a dropped stream would
pub fn fail_stream(peer: &FakePeer) {
    peer.emit(PeerEvent::ConnectionStateChanged(PeerConnectionState::Failed));
}

// --- Observer ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    State(ConnectionState, ConnectionState),
    Stream(usize),
    ChannelOpen(String),
    ChannelClose,
    Disconnect(DisconnectReason),
}

#[derive(Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<Observed>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<Observed> {
        self.events.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Observed) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }
}

impl ConnectionObserver for RecordingObserver {
    fn on_state_change(&self, old: ConnectionState, new: ConnectionState) {
        self.events.lock().push(Observed::State(old, new));
    }

    fn on_stream(&self, tracks: &[Arc<dyn MediaTrack>]) {
        self.events.lock().push(Observed::Stream(tracks.len()));
    }

    fn on_data_channel_open(&self, channel: &Arc<dyn ControlChannel>) {
        self.events.lock().push(Observed::ChannelOpen(channel.label()));
    }

    fn on_data_channel_close(&self) {
        self.events.lock().push(Observed::ChannelClose);
    }

    fn on_disconnect(&self, reason: DisconnectReason) {
        self.events.lock().push(Observed::Disconnect(reason));
    }
}

// --- Helpers ---

/// Wait until the watched state equals `target`
pub async fn wait_for_state(rx: &mut watch::Receiver<ConnectionState>, target: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(30), rx.wait_for(|s| *s == target))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", target))
        .unwrap_or_else(|_| panic!("state channel closed waiting for {}", target));
}

/// Poll `condition` until it holds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

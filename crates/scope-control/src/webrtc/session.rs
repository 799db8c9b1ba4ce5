//! A negotiated session
//!
//! Owns the peer connection, optional control channel and local tracks.
//! Once [`Session::start_events`] is called a background pump forwards the
//! events the controller cares about as [`SessionEvent`]s, and a second task
//! trickles the remaining ICE candidates to the server in gathering order.

use super::ice::IceTrickle;
use super::{ControlChannel, MediaTrack, PeerConnection, PeerConnectionState, PeerEvent};
use crate::api::{IceCandidateInit, ScopeApi};
use futures::future::join_all;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Session-level happenings the controller reacts to
#[derive(Clone)]
pub enum SessionEvent {
    Track(Arc<dyn MediaTrack>),
    ChannelOpen,
    ChannelClosed,
    /// Inbound media stopped; carries a reason for logs
    StreamEnded(String),
}

impl fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEvent::Track(t) => f.debug_tuple("Track").field(&t.id()).finish(),
            SessionEvent::ChannelOpen => f.write_str("ChannelOpen"),
            SessionEvent::ChannelClosed => f.write_str("ChannelClosed"),
            SessionEvent::StreamEnded(r) => f.debug_tuple("StreamEnded").field(r).finish(),
        }
    }
}

pub struct Session {
    session_id: String,
    peer: Arc<dyn PeerConnection>,
    channel: Option<Arc<dyn ControlChannel>>,
    local_tracks: Vec<Arc<dyn MediaTrack>>,
    api: Arc<dyn ScopeApi>,
    trickle: Arc<Mutex<IceTrickle>>,
    events: Option<mpsc::UnboundedReceiver<PeerEvent>>,
    backlog: Vec<PeerEvent>,
    pump: Option<JoinHandle<()>>,
    ice_sender: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(
        session_id: impl Into<String>,
        peer: Arc<dyn PeerConnection>,
        api: Arc<dyn ScopeApi>,
        events: mpsc::UnboundedReceiver<PeerEvent>,
    ) -> Self {
        let session_id = session_id.into();
        let mut trickle = IceTrickle::new();
        trickle.set_session_id(session_id.clone());

        Self {
            session_id,
            peer,
            channel: None,
            local_tracks: Vec::new(),
            api,
            trickle: Arc::new(Mutex::new(trickle)),
            events: Some(events),
            backlog: Vec::new(),
            pump: None,
            ice_sender: None,
        }
    }

    pub fn with_channel(mut self, channel: Option<Arc<dyn ControlChannel>>) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_local_tracks(mut self, tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        self.local_tracks = tracks;
        self
    }

    /// Events that arrived during negotiation, replayed first by the pump
    pub(crate) fn with_backlog(mut self, backlog: Vec<PeerEvent>) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn control_channel(&self) -> Option<Arc<dyn ControlChannel>> {
        self.channel.clone()
    }

    pub fn peer(&self) -> Arc<dyn PeerConnection> {
        self.peer.clone()
    }

    /// Start the event pump. Only the first call has an effect.
    pub fn start_events(&mut self, tx: mpsc::UnboundedSender<SessionEvent>) {
        let Some(events) = self.events.take() else {
            return;
        };
        let backlog = std::mem::take(&mut self.backlog);
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        self.ice_sender = Some(tokio::spawn(send_candidates(self.api.clone(), ready_rx)));
        self.pump = Some(tokio::spawn(pump(
            events,
            backlog,
            self.trickle.clone(),
            ready_tx,
            tx,
        )));
    }

    fn stop_tasks(&mut self) {
        for task in [self.pump.take(), self.ice_sender.take()].into_iter().flatten() {
            task.abort();
        }
    }

    /// Stop tracks, close the channel and the peer connection
    pub async fn close(mut self) {
        self.stop_tasks();
        self.trickle.lock().clear();

        join_all(self.local_tracks.iter().map(|track| track.stop())).await;
        if let Some(channel) = &self.channel {
            channel.close().await;
        }
        self.peer.close().await;
        debug!("Session {} closed", self.session_id);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop_tasks();
    }
}

type ReadyCandidate = (String, IceCandidateInit);

async fn pump(
    mut events: mpsc::UnboundedReceiver<PeerEvent>,
    backlog: Vec<PeerEvent>,
    trickle: Arc<Mutex<IceTrickle>>,
    ready: mpsc::UnboundedSender<ReadyCandidate>,
    tx: mpsc::UnboundedSender<SessionEvent>,
) {
    for event in backlog {
        if !handle_event(event, &trickle, &ready, &tx) {
            return;
        }
    }
    while let Some(event) = events.recv().await {
        if !handle_event(event, &trickle, &ready, &tx) {
            return;
        }
    }
    debug!("Peer event stream ended");
}

/// One PATCH per candidate, in order. Runs apart from the pump so a slow
/// server never holds up session events.
async fn send_candidates(
    api: Arc<dyn ScopeApi>,
    mut ready: mpsc::UnboundedReceiver<ReadyCandidate>,
) {
    while let Some((session_id, candidate)) = ready.recv().await {
        if let Err(e) = api.add_ice_candidates(&session_id, &[candidate]).await {
            warn!("Failed to send ICE candidate: {}", e);
        }
    }
}

/// Returns false once nobody is listening
fn handle_event(
    event: PeerEvent,
    trickle: &Mutex<IceTrickle>,
    ready: &mpsc::UnboundedSender<ReadyCandidate>,
    tx: &mpsc::UnboundedSender<SessionEvent>,
) -> bool {
    trace!("Peer event: {:?}", event);
    let forward = match event {
        PeerEvent::IceCandidate(candidate) => {
            if let Some(candidate) = trickle.lock().push(candidate) {
                let _ = ready.send(candidate);
            }
            None
        }
        PeerEvent::IceGatheringComplete => {
            debug!("ICE gathering complete");
            None
        }
        PeerEvent::ConnectionStateChanged(state) => match state {
            PeerConnectionState::Failed | PeerConnectionState::Closed => Some(
                SessionEvent::StreamEnded(format!("peer connection {:?}", state)),
            ),
            other => {
                debug!("Peer connection state: {:?}", other);
                None
            }
        },
        PeerEvent::Track(track) => Some(SessionEvent::Track(track)),
        PeerEvent::TrackEnded(id) => Some(SessionEvent::StreamEnded(format!("track {} ended", id))),
        PeerEvent::ChannelOpen => Some(SessionEvent::ChannelOpen),
        PeerEvent::ChannelClosed => Some(SessionEvent::ChannelClosed),
        PeerEvent::ChannelMessage(text) => {
            debug!("Control channel message: {}", text);
            None
        }
    };

    match forward {
        Some(event) => tx.send(event).is_ok(),
        None => true,
    }
}

//! Offer/answer/ICE exchange with the Scope server

use super::ice::IceTrickle;
use super::session::Session;
use super::{
    ControlChannel, MediaTrack, PeerConnection, PeerEvent, PeerFactory, PeerSetup, SdpType,
    SessionDescription,
};
use crate::api::{OfferRequest, ScopeApi};
use crate::error::{ApiError, NegotiationError, PeerError};
use async_trait::async_trait;
use futures::future::join_all;
use scope_core::parameters::ScopeParameters;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Cooperative cancellation for an in-flight negotiation
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`CancelSignal::cancel`] has been called
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Per-negotiation options
#[derive(Debug, Clone, Default)]
pub struct NegotiateOptions {
    /// Label of the control data channel; `None` negotiates media only
    pub control_channel: Option<String>,
    /// Sent with the offer so the first frames already use them
    pub initial_parameters: Option<ScopeParameters>,
}

/// Performs one negotiation
#[async_trait]
pub trait Negotiate: Send + Sync {
    async fn negotiate(
        &self,
        options: &NegotiateOptions,
        cancel: &CancelSignal,
    ) -> Result<Session, NegotiationError>;
}

/// Race `fut` against cancellation
async fn cancellable<F: Future>(
    cancel: &CancelSignal,
    fut: F,
) -> Result<F::Output, NegotiationError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(NegotiationError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Resources created so far; released if negotiation fails
#[derive(Default)]
struct Partial {
    local_tracks: Vec<Arc<dyn MediaTrack>>,
    channel: Option<Arc<dyn ControlChannel>>,
}

impl Partial {
    async fn release(self, peer: &dyn PeerConnection) {
        join_all(self.local_tracks.iter().map(|track| track.stop())).await;
        if let Some(channel) = &self.channel {
            channel.close().await;
        }
        peer.close().await;
    }
}

/// Negotiates sessions against a [`ScopeApi`]
pub struct SessionNegotiator {
    api: Arc<dyn ScopeApi>,
    factory: Arc<dyn PeerFactory>,
    setup: Arc<dyn PeerSetup>,
}

impl SessionNegotiator {
    pub fn new(
        api: Arc<dyn ScopeApi>,
        factory: Arc<dyn PeerFactory>,
        setup: Arc<dyn PeerSetup>,
    ) -> Self {
        Self {
            api,
            factory,
            setup,
        }
    }

    /// Everything after the peer connection exists
    async fn exchange(
        &self,
        peer: &Arc<dyn PeerConnection>,
        partial: &mut Partial,
        options: &NegotiateOptions,
        cancel: &CancelSignal,
    ) -> Result<Session, NegotiationError> {
        let mut events = peer.take_events().ok_or_else(|| {
            NegotiationError::PeerSetup(PeerError::Backend(
                "peer event stream already taken".to_string(),
            ))
        })?;

        partial.local_tracks = cancellable(cancel, self.setup.setup(peer.as_ref()))
            .await?
            .map_err(NegotiationError::PeerSetup)?;

        if let Some(label) = &options.control_channel {
            let channel = cancellable(cancel, peer.create_control_channel(label))
                .await?
                .map_err(NegotiationError::PeerSetup)?;
            debug!("Created control channel '{}'", label);
            partial.channel = Some(channel);
        }

        let offer = cancellable(cancel, peer.create_offer())
            .await?
            .map_err(NegotiationError::LocalDescription)?;
        cancellable(cancel, peer.set_local_description(offer))
            .await?
            .map_err(NegotiationError::LocalDescription)?;
        let local = peer.local_description().await.ok_or_else(|| {
            NegotiationError::LocalDescription(PeerError::Backend(
                "no local description after setting it".to_string(),
            ))
        })?;
        debug!("Local description ready ({} bytes)", local.sdp.len());

        let request = OfferRequest {
            sdp: local.sdp,
            sdp_type: local.sdp_type.to_string(),
            initial_parameters: options.initial_parameters.clone(),
        };

        // Candidates gathered while the offer is in flight wait for the session id
        let mut trickle = IceTrickle::new();
        let mut backlog = Vec::new();
        let answer = {
            let post = self.api.create_webrtc_offer(&request);
            tokio::pin!(post);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(NegotiationError::Cancelled),
                    result = &mut post => break result,
                    Some(event) = events.recv() => match event {
                        PeerEvent::IceCandidate(candidate) => {
                            trickle.push(candidate);
                        }
                        other => backlog.push(other),
                    },
                }
            }
        };

        let answer = match answer {
            Ok(answer) => answer,
            Err(ApiError::Empty(_)) => return Err(NegotiationError::NoAnswer),
            Err(e) => return Err(NegotiationError::OfferRejected(e)),
        };
        if answer.sdp.is_empty() || answer.session_id.is_empty() {
            return Err(NegotiationError::NoAnswer);
        }

        let remote = SessionDescription {
            sdp_type: SdpType::parse(&answer.sdp_type).unwrap_or(SdpType::Answer),
            sdp: answer.sdp,
        };
        cancellable(cancel, peer.set_remote_description(remote))
            .await?
            .map_err(NegotiationError::RemoteDescription)?;

        while let Ok(event) = events.try_recv() {
            match event {
                PeerEvent::IceCandidate(candidate) => {
                    trickle.push(candidate);
                }
                other => backlog.push(other),
            }
        }

        let session_id = answer.session_id;
        let queued = trickle.set_session_id(session_id.clone());
        if !queued.is_empty() {
            debug!("Flushing {} queued ICE candidates", queued.len());
            if let Err(e) = self.api.add_ice_candidates(&session_id, &queued).await {
                warn!("Failed to send queued ICE candidates: {}", e);
            }
        }

        info!("Negotiated session {}", session_id);
        Ok(Session::new(session_id, peer.clone(), self.api.clone(), events)
            .with_channel(partial.channel.clone())
            .with_local_tracks(partial.local_tracks.clone())
            .with_backlog(backlog))
    }
}

#[async_trait]
impl Negotiate for SessionNegotiator {
    async fn negotiate(
        &self,
        options: &NegotiateOptions,
        cancel: &CancelSignal,
    ) -> Result<Session, NegotiationError> {
        let ice = cancellable(cancel, self.api.get_ice_servers())
            .await?
            .map_err(NegotiationError::IceServers)?;
        debug!("Using {} ICE servers", ice.ice_servers.len());

        let peer = cancellable(cancel, self.factory.create(&ice.ice_servers))
            .await?
            .map_err(NegotiationError::PeerSetup)?;

        let mut partial = Partial::default();
        match self.exchange(&peer, &mut partial, options, cancel).await {
            Ok(session) => Ok(session),
            Err(e) => {
                if matches!(e, NegotiationError::Cancelled) {
                    debug!("Negotiation cancelled, releasing peer connection");
                } else {
                    warn!("Negotiation failed: {}", e);
                }
                partial.release(peer.as_ref()).await;
                Err(e)
            }
        }
    }
}

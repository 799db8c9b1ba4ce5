//! Connection lifecycle controller
//!
//! Wraps a [`Negotiate`] implementation with the connection state machine.
//! Owns at most one [`Session`] at a time and is the only thing that tears
//! sessions down. Public operations never return negotiation failures; they
//! land in the `error` state and [`ConnectionController::error`] instead.

use super::state::{ConnectionEvent, ConnectionState};
use crate::error::{ConnectionError, NegotiationError, ParameterSendError};
use crate::sender::{self, ChannelProvider};
use crate::webrtc::{
    CancelSignal, ControlChannel, MediaTrack, Negotiate, NegotiateOptions, Session, SessionEvent,
};
use parking_lot::{Mutex, RwLock};
use scope_core::parameters::ScopeParameters;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Why a connected session was lost
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    StreamStopped,
    ChannelClosed,
}

impl DisconnectReason {
    fn as_error(self) -> ConnectionError {
        match self {
            DisconnectReason::StreamStopped => ConnectionError::StreamStopped,
            DisconnectReason::ChannelClosed => ConnectionError::ChannelClosed,
        }
    }
}

/// When and how often to reconnect
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub on_stream_stop: bool,
    pub on_channel_close: bool,
    pub max_attempts: u32,
    /// Delay before the first attempt; doubles for each following one
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            on_stream_stop: true,
            on_channel_close: true,
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl ReconnectPolicy {
    /// Never reconnect automatically
    pub fn disabled() -> Self {
        Self {
            on_stream_stop: false,
            on_channel_close: false,
            ..Default::default()
        }
    }

    /// `base_delay * 2^(attempt - 1)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    pub fn reconnects_on(&self, reason: DisconnectReason) -> bool {
        match reason {
            DisconnectReason::StreamStopped => self.on_stream_stop,
            DisconnectReason::ChannelClosed => self.on_channel_close,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub reconnect: ReconnectPolicy,
    /// Control data channel label; `None` for media-only sessions
    pub control_channel: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            control_channel: Some("parameters".to_string()),
        }
    }
}

/// Controller notifications. Called outside internal locks; must not block.
pub trait ConnectionObserver: Send + Sync {
    fn on_state_change(&self, _old: ConnectionState, _new: ConnectionState) {}

    /// Once per negotiated session, with the first inbound track
    fn on_stream(&self, _tracks: &[Arc<dyn MediaTrack>]) {}

    fn on_data_channel_open(&self, _channel: &Arc<dyn ControlChannel>) {}

    /// The control channel went away: closed by the remote, lost with its
    /// session, or torn down by `disconnect`
    fn on_data_channel_close(&self) {}

    /// The controller left `connected` involuntarily
    fn on_disconnect(&self, _reason: DisconnectReason) {}
}

/// Decides whether a lost session should be re-established
pub type ReconnectPredicate = Arc<dyn Fn(DisconnectReason) -> bool + Send + Sync>;

#[derive(Default)]
struct Core {
    state: ConnectionState,
    error: Option<ConnectionError>,
    session: Option<Session>,
    session_id: Option<String>,
    channel: Option<Arc<dyn ControlChannel>>,
    /// Cancels the in-flight negotiation or backoff wait
    cancel: Option<CancelSignal>,
    attempt: u32,
    /// Bumped whenever the current session or attempt is abandoned
    generation: u64,
    initial_parameters: Option<ScopeParameters>,
}

struct Inner {
    negotiator: Arc<dyn Negotiate>,
    config: ConnectionConfig,
    should_reconnect: RwLock<ReconnectPredicate>,
    observers: RwLock<Vec<Arc<dyn ConnectionObserver>>>,
    core: Mutex<Core>,
    state_tx: watch::Sender<ConnectionState>,
}

/// Cheap to clone; clones share the same connection
#[derive(Clone)]
pub struct ConnectionController {
    inner: Arc<Inner>,
}

impl ConnectionController {
    pub fn new(negotiator: Arc<dyn Negotiate>, config: ConnectionConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            inner: Arc::new(Inner {
                negotiator,
                config,
                should_reconnect: RwLock::new(Arc::new(|_| true)),
                observers: RwLock::new(Vec::new()),
                core: Mutex::new(Core::default()),
                state_tx,
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn add_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        self.inner.observers.write().push(observer);
    }

    pub fn set_reconnect_predicate<F>(&self, predicate: F)
    where
        F: Fn(DisconnectReason) -> bool + Send + Sync + 'static,
    {
        *self.inner.should_reconnect.write() = Arc::new(predicate);
    }

    /// Parameters sent with the next offer
    pub fn set_initial_parameters(&self, params: Option<ScopeParameters>) {
        self.inner.core.lock().initial_parameters = params;
    }

    /// Connect from `idle`, `disconnected` or `error`; ignored otherwise
    ///
    /// Resolves once this negotiation has succeeded, failed or been
    /// cancelled by [`ConnectionController::disconnect`].
    pub async fn connect(&self) {
        self.inner.clone().start(ConnectionEvent::Connect).await;
    }

    /// Reset the attempt counter and connect from `error` or `disconnected`
    pub async fn retry(&self) {
        self.inner.clone().start(ConnectionEvent::Retry).await;
    }

    /// Tear down everything and go to `disconnected`. No-op from `idle` or `disconnected`.
    pub async fn disconnect(&self) {
        self.inner.disconnect().await;
    }

    /// Clear the recorded error without changing state
    pub fn clear_error(&self) {
        self.inner.core.lock().error = None;
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.core.lock().state
    }

    pub fn error(&self) -> Option<ConnectionError> {
        self.inner.core.lock().error.clone()
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.core.lock().session_id.clone()
    }

    /// Current reconnect attempt (0 when not reconnecting)
    pub fn reconnect_attempt(&self) -> u32 {
        self.inner.core.lock().attempt
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Send one payload on the current control channel. Never changes state.
    pub async fn send_parameters(&self, params: &ScopeParameters) -> Result<(), ParameterSendError> {
        let channel = self
            .control_channel()
            .ok_or(ParameterSendError::ChannelNotOpen)?;
        sender::send_on(channel.as_ref(), params).await
    }
}

impl ChannelProvider for ConnectionController {
    fn control_channel(&self) -> Option<Arc<dyn ControlChannel>> {
        let core = self.inner.core.lock();
        if core.state == ConnectionState::Connected {
            core.channel.clone()
        } else {
            None
        }
    }
}

impl Inner {
    fn observers(&self) -> Vec<Arc<dyn ConnectionObserver>> {
        self.observers.read().clone()
    }

    fn notify_state(&self, old: ConnectionState, new: ConnectionState) {
        if old == new {
            return;
        }
        info!("Connection state: {} -> {}", old, new);
        self.state_tx.send_replace(new);
        for observer in self.observers() {
            observer.on_state_change(old, new);
        }
    }

    fn options(&self, core: &Core) -> NegotiateOptions {
        NegotiateOptions {
            control_channel: self.config.control_channel.clone(),
            initial_parameters: core.initial_parameters.clone(),
        }
    }

    async fn start(self: Arc<Self>, event: ConnectionEvent) {
        let (generation, cancel, options, old) = {
            let mut core = self.core.lock();
            let old = core.state;
            let Some(new) = old.apply(event) else {
                debug!("{:?} ignored while {}", event, old);
                return;
            };
            core.state = new;
            core.attempt = 0;
            core.generation += 1;
            let cancel = CancelSignal::new();
            core.cancel = Some(cancel.clone());
            (core.generation, cancel, self.options(&core), old)
        };
        self.notify_state(old, ConnectionState::Connecting);

        match self.negotiator.negotiate(&options, &cancel).await {
            Ok(session) => {
                if let Some(events) = self.install(generation, session).await {
                    tokio::spawn(self.clone().supervise(generation, events));
                }
            }
            Err(NegotiationError::Cancelled) => debug!("Connect cancelled"),
            Err(e) => self.fail_connect(generation, &e),
        }
    }

    fn fail_connect(&self, generation: u64, e: &NegotiationError) {
        let change = {
            let mut core = self.core.lock();
            if core.generation != generation {
                return;
            }
            let old = core.state;
            old.apply(ConnectionEvent::NegotiationFailed).map(|new| {
                core.state = new;
                core.error = Some(e.into());
                core.cancel = None;
                (old, new)
            })
        };
        if let Some((old, new)) = change {
            error!("Connection failed: {}", e);
            self.notify_state(old, new);
        }
    }

    /// Adopt a freshly negotiated session unless it has gone stale
    async fn install(
        &self,
        generation: u64,
        mut session: Session,
    ) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let outcome = {
            let mut core = self.core.lock();
            let next = (core.generation == generation)
                .then(|| core.state.apply(ConnectionEvent::Negotiated))
                .flatten();
            match next {
                Some(new) => {
                    let old = core.state;
                    core.state = new;
                    core.error = None;
                    core.attempt = 0;
                    core.cancel = None;
                    core.session_id = Some(session.session_id().to_string());
                    core.channel = session.control_channel();
                    session.start_events(tx);
                    core.session = Some(session);
                    Ok(old)
                }
                None => Err(session),
            }
        };

        match outcome {
            Ok(old) => {
                self.notify_state(old, ConnectionState::Connected);
                Some(rx)
            }
            Err(session) => {
                debug!("Discarding stale session {}", session.session_id());
                session.close().await;
                None
            }
        }
    }

    /// Follow session events; reconnect on loss as policy allows
    async fn supervise(
        self: Arc<Self>,
        mut generation: u64,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        loop {
            let Some(reason) = self.watch_session(generation, &mut events).await else {
                return;
            };
            let Some((next_generation, cancel)) = self.handle_loss(generation, reason).await else {
                return;
            };
            match self.reconnect(next_generation, cancel).await {
                Some(rx) => {
                    generation = next_generation;
                    events = rx;
                }
                None => return,
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.core.lock().generation == generation
    }

    async fn watch_session(
        &self,
        generation: u64,
        events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Option<DisconnectReason> {
        let mut stream_announced = false;
        while let Some(event) = events.recv().await {
            if !self.is_current(generation) {
                return None;
            }
            match event {
                SessionEvent::Track(track) => {
                    if stream_announced {
                        debug!("Additional inbound track {}", track.id());
                        continue;
                    }
                    stream_announced = true;
                    info!("Inbound {:?} track {}", track.kind(), track.id());
                    let tracks = [track];
                    for observer in self.observers() {
                        observer.on_stream(&tracks);
                    }
                }
                SessionEvent::ChannelOpen => {
                    let channel = self.core.lock().channel.clone();
                    if let Some(channel) = channel {
                        info!("Control channel '{}' open", channel.label());
                        for observer in self.observers() {
                            observer.on_data_channel_open(&channel);
                        }
                    }
                }
                SessionEvent::ChannelClosed => {
                    warn!("Control channel closed");
                    return Some(DisconnectReason::ChannelClosed);
                }
                SessionEvent::StreamEnded(why) => {
                    warn!("Media stream stopped: {}", why);
                    return Some(DisconnectReason::StreamStopped);
                }
            }
        }

        // The pump is gone; a live generation means the peer stopped reporting
        if self.is_current(generation) {
            warn!("Session event stream ended");
            Some(DisconnectReason::StreamStopped)
        } else {
            None
        }
    }

    /// Leave `connected`; returns the new generation and cancel signal when reconnecting
    async fn handle_loss(
        &self,
        generation: u64,
        reason: DisconnectReason,
    ) -> Option<(u64, CancelSignal)> {
        let predicate = self.should_reconnect.read().clone();
        let reconnect = self.config.reconnect.reconnects_on(reason) && predicate(reason);

        let (session, had_channel, old, new, next) = {
            let mut core = self.core.lock();
            if core.generation != generation {
                return None;
            }
            let old = core.state;
            let new = old.apply(ConnectionEvent::ConnectionLost { reconnect })?;
            core.state = new;
            core.generation += 1;
            let had_channel = core.channel.take().is_some();
            core.session_id = None;
            let next = if reconnect {
                let cancel = CancelSignal::new();
                core.cancel = Some(cancel.clone());
                core.attempt = 0;
                Some((core.generation, cancel))
            } else {
                core.error = Some(reason.as_error());
                None
            };
            (core.session.take(), had_channel, old, new, next)
        };

        if let Some(session) = session {
            session.close().await;
        }
        for observer in self.observers() {
            if had_channel {
                observer.on_data_channel_close();
            }
            observer.on_disconnect(reason);
        }
        self.notify_state(old, new);
        next
    }

    /// Backoff loop; returns the new session's events on success
    async fn reconnect(
        &self,
        generation: u64,
        cancel: CancelSignal,
    ) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        let policy = &self.config.reconnect;

        for attempt in 1..=policy.max_attempts {
            let options = {
                let mut core = self.core.lock();
                if core.generation != generation {
                    return None;
                }
                core.attempt = attempt;
                self.options(&core)
            };

            let delay = policy.delay_for(attempt);
            info!(
                "Reconnect attempt {}/{} in {:?}",
                attempt, policy.max_attempts, delay
            );
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.negotiator.negotiate(&options, &cancel).await {
                Ok(session) => return self.install(generation, session).await,
                Err(NegotiationError::Cancelled) => return None,
                Err(e) => {
                    warn!("Reconnect attempt {} failed: {}", attempt, e);
                    let mut core = self.core.lock();
                    if core.generation != generation {
                        return None;
                    }
                    core.error = Some((&e).into());
                }
            }
        }

        let change = {
            let mut core = self.core.lock();
            if core.generation != generation {
                return None;
            }
            let old = core.state;
            old.apply(ConnectionEvent::RetriesExhausted).map(|new| {
                core.state = new;
                core.error = Some(ConnectionError::ReconnectExhausted(policy.max_attempts));
                core.cancel = None;
                (old, new)
            })
        };
        if let Some((old, new)) = change {
            error!(
                "Giving up after {} reconnect attempts",
                policy.max_attempts
            );
            self.notify_state(old, new);
        }
        None
    }

    async fn disconnect(&self) {
        let (old, new, session, cancel, had_channel) = {
            let mut core = self.core.lock();
            let old = core.state;
            let Some(new) = old.apply(ConnectionEvent::Disconnect) else {
                debug!("disconnect() ignored while {}", old);
                return;
            };
            core.state = new;
            core.generation += 1;
            core.error = None;
            core.attempt = 0;
            core.session_id = None;
            let had_channel = core.channel.take().is_some();
            (old, new, core.session.take(), core.cancel.take(), had_channel)
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(session) = session {
            session.close().await;
            if had_channel {
                for observer in self.observers() {
                    observer.on_data_channel_close();
                }
            }
        }
        self.notify_state(old, new);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(500),
            ..Default::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_secs(u64::MAX / 2),
            ..Default::default()
        };
        assert_eq!(policy.delay_for(10), Duration::MAX);
    }

    #[test]
    fn test_policy_flags() {
        let policy = ReconnectPolicy {
            on_channel_close: false,
            ..Default::default()
        };
        assert!(policy.reconnects_on(DisconnectReason::StreamStopped));
        assert!(!policy.reconnects_on(DisconnectReason::ChannelClosed));
        assert!(!ReconnectPolicy::disabled().reconnects_on(DisconnectReason::StreamStopped));
    }
}

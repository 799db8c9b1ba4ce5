//! Parameter sender
//!
//! Serializes [`ScopeParameters`] onto the control channel. [`ParameterSender`]
//! adds rate limiting on top: identical payloads are dropped and payloads that
//! arrive too soon are held back, newest wins.

use crate::error::ParameterSendError;
use crate::webrtc::ControlChannel;
use scope_core::parameters::ScopeParameters;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Default spacing between two sends
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Supplies the control channel of the current session, if any
pub trait ChannelProvider: Send + Sync {
    fn control_channel(&self) -> Option<Arc<dyn ControlChannel>>;
}

impl ChannelProvider for Arc<dyn ControlChannel> {
    fn control_channel(&self) -> Option<Arc<dyn ControlChannel>> {
        Some(self.clone())
    }
}

/// Send one payload as JSON text on `channel`
pub async fn send_on(
    channel: &dyn ControlChannel,
    params: &ScopeParameters,
) -> Result<(), ParameterSendError> {
    if !channel.is_open() {
        return Err(ParameterSendError::ChannelNotOpen);
    }
    let text = params.to_json()?;
    channel
        .send_text(&text)
        .await
        .map_err(ParameterSendError::Transport)
}

/// What [`ParameterSender::offer`] did with a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Same settings as the last payload sent
    Duplicate,
    /// Held until the minimum interval has passed
    Deferred,
}

pub struct ParameterSender {
    provider: Arc<dyn ChannelProvider>,
    min_interval: Duration,
    last_sent: Option<ScopeParameters>,
    last_sent_at: Option<Instant>,
    pending: Option<ScopeParameters>,
    sent_count: u64,
}

impl ParameterSender {
    pub fn new(provider: Arc<dyn ChannelProvider>) -> Self {
        Self::with_min_interval(provider, DEFAULT_MIN_INTERVAL)
    }

    pub fn with_min_interval(provider: Arc<dyn ChannelProvider>, min_interval: Duration) -> Self {
        Self {
            provider,
            min_interval,
            last_sent: None,
            last_sent_at: None,
            pending: None,
            sent_count: 0,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Send immediately, bypassing rate limiting
    pub async fn send(&mut self, params: &ScopeParameters) -> Result<(), ParameterSendError> {
        let channel = self
            .provider
            .control_channel()
            .ok_or(ParameterSendError::ChannelNotOpen)?;
        send_on(channel.as_ref(), params).await?;

        self.last_sent = Some(params.clone());
        self.last_sent_at = Some(Instant::now());
        self.sent_count += 1;
        trace!(
            "Sent parameters: noise {:.3}, steps {:?}",
            params.noise_scale,
            params.denoising_step_list
        );
        Ok(())
    }

    /// Rate-limited send
    pub async fn offer(
        &mut self,
        params: ScopeParameters,
    ) -> Result<SendOutcome, ParameterSendError> {
        if params.reset_cache() {
            self.pending = None;
            self.send(&params).await?;
            return Ok(SendOutcome::Sent);
        }

        if self
            .last_sent
            .as_ref()
            .is_some_and(|last| last.same_settings(&params))
        {
            self.pending = None;
            return Ok(SendOutcome::Duplicate);
        }

        if !self.interval_elapsed() {
            self.pending = Some(params);
            return Ok(SendOutcome::Deferred);
        }

        self.send(&params).await?;
        Ok(SendOutcome::Sent)
    }

    /// Send the held payload if its interval has passed. Returns whether one was sent.
    ///
    /// A payload that fails to send stays pending.
    pub async fn flush_pending(&mut self) -> Result<bool, ParameterSendError> {
        if self.pending.is_none() || !self.interval_elapsed() {
            return Ok(false);
        }
        let Some(params) = self.pending.take() else {
            return Ok(false);
        };
        match self.send(&params).await {
            Ok(()) => Ok(true),
            Err(e) => {
                self.pending = Some(params);
                Err(e)
            }
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn last_sent(&self) -> Option<&ScopeParameters> {
        self.last_sent.as_ref()
    }

    pub fn sent_count(&self) -> u64 {
        self.sent_count
    }

    /// Forget send history, e.g. for a fresh session
    pub fn reset(&mut self) {
        debug!("Parameter sender reset");
        self.last_sent = None;
        self.last_sent_at = None;
        self.pending = None;
    }

    fn interval_elapsed(&self) -> bool {
        self.last_sent_at
            .map_or(true, |at| at.elapsed() >= self.min_interval)
    }
}

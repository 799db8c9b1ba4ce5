//! Soundscape driver: analysis ticks in, rate-limited parameters out

use crate::connection::ConnectionState;
use crate::error::ParameterSendError;
use crate::sender::{ParameterSender, SendOutcome};
use scope_core::audio::AnalysisState;
use scope_core::mapping::compute_parameters;
use scope_core::parameters::{ScopeParameters, VaceSettings};
use scope_core::theme::Theme;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

pub struct SoundscapeDriver {
    theme: Theme,
    previous: Option<ScopeParameters>,
    paused: bool,
    vace: Option<VaceSettings>,
    sender: ParameterSender,
}

impl SoundscapeDriver {
    pub fn new(theme: Theme, sender: ParameterSender) -> Self {
        Self {
            theme,
            previous: None,
            paused: false,
            vace: None,
            sender,
        }
    }

    pub fn theme(&self) -> &Theme {
        &self.theme
    }

    /// Swap the active theme; the next tick is mapped with it
    pub fn set_theme(&mut self, theme: Theme) {
        info!("Soundscape theme: {} ({})", theme.name, theme.id);
        self.theme = theme;
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        if let Some(prev) = &mut self.previous {
            prev.paused = paused;
        }
    }

    pub fn set_vace(&mut self, vace: Option<VaceSettings>) {
        if let Some(prev) = &mut self.previous {
            prev.set_vace(vace.clone());
        }
        self.vace = vace;
    }

    pub fn last_parameters(&self) -> Option<&ScopeParameters> {
        self.previous.as_ref()
    }

    pub fn sender(&self) -> &ParameterSender {
        &self.sender
    }

    /// Parameters for the offer: silent audio mapped through the current theme
    pub fn initial_parameters(&self) -> ScopeParameters {
        let mut params = compute_parameters(
            &self.theme,
            &AnalysisState::silent(),
            Some(&self.carried()),
        );
        params.reset_cache = None;
        params
    }

    /// State the audio does not drive
    fn carried(&self) -> ScopeParameters {
        let mut carried = self.previous.clone().unwrap_or_default();
        carried.paused = self.paused;
        carried.set_vace(self.vace.clone());
        carried
    }

    /// Map one tick and offer it to the sender
    pub async fn on_analysis(
        &mut self,
        state: &AnalysisState,
    ) -> Result<SendOutcome, ParameterSendError> {
        let params = compute_parameters(&self.theme, state, Some(&self.carried()));
        trace!(
            "Tick {:.3}s: energy {:.2} -> noise {:.3}",
            state.timestamp,
            state.derived.energy,
            params.noise_scale
        );
        self.previous = Some(params.clone());
        self.sender.offer(params).await
    }

    /// Send anything the rate limiter held back
    pub async fn flush(&mut self) -> Result<bool, ParameterSendError> {
        self.sender.flush_pending().await
    }

    /// Drive from a tick stream until it closes
    ///
    /// Send history is reset whenever the connection (re)enters `connected`
    /// so the new session gets the current parameters right away.
    pub async fn run(
        mut self,
        mut ticks: mpsc::UnboundedReceiver<AnalysisState>,
        mut states: watch::Receiver<ConnectionState>,
    ) -> Self {
        let mut flush = tokio::time::interval(self.sender.min_interval().max(Duration::from_millis(1)));
        flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut states_open = true;

        loop {
            tokio::select! {
                tick = ticks.recv() => {
                    let Some(state) = tick else { break };
                    match self.on_analysis(&state).await {
                        Ok(_) | Err(ParameterSendError::ChannelNotOpen) => {}
                        Err(e) => warn!("Parameter send failed: {}", e),
                    }
                }
                _ = flush.tick() => {
                    match self.flush().await {
                        Ok(_) | Err(ParameterSendError::ChannelNotOpen) => {}
                        Err(e) => warn!("Parameter flush failed: {}", e),
                    }
                }
                changed = states.changed(), if states_open => {
                    if changed.is_err() {
                        states_open = false;
                        continue;
                    }
                    if *states.borrow_and_update() == ConnectionState::Connected {
                        self.sender.reset();
                        if let Some(mut params) = self.previous.clone() {
                            // Cache resets are one-shot per beat and never replayed
                            params.reset_cache = None;
                            debug!("Resending current parameters to new session");
                            if let Err(e) = self.sender.send(&params).await {
                                warn!("Parameter resend failed: {}", e);
                            }
                        }
                    }
                }
            }
        }

        debug!("Analysis stream ended, soundscape driver stopping");
        self
    }
}

//! Real-time audio analysis
//!
//! Turns a live audio source into a stream of [`AnalysisState`] snapshots:
//! raw spectral/time-domain features, a lightweight beat/tempo estimate and
//! smoothed metrics that the mapping engine consumes.
//!
//! - [`analyzer`] - FFT-based DSP core, one tick per hop
//! - [`beat`] - onset detection and tempo clustering
//! - [`features`] - per-frame feature extraction helpers
//! - [`source`] - audio sources (buffer, WAV file, cpal input)
//! - [`live`] - attach/detach/observer wrapper running on a worker thread

pub mod analyzer;
pub mod beat;
pub mod features;
pub mod live;
pub mod source;

pub use analyzer::{AnalyzerConfig, AudioAnalyzer};
pub use beat::{BeatConfig, BeatTracker};
pub use live::LiveAnalyzer;
pub use source::{AudioSource, BufferSource, WavFileSource};

#[cfg(feature = "audio")]
pub use source::CpalInputSource;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Audio analysis errors
///
/// Only source availability is a hard error. Silent or malformed input
/// degrades to neutral features instead.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// No usable input device
    #[error("No audio input device available")]
    NoInputDevice,

    /// The source could not be opened or started
    #[error("Audio source unavailable: {0}")]
    SourceUnavailable(String),

    /// `attach` called while a source is bound
    #[error("Analyzer is already attached to a source")]
    AlreadyAttached,

    /// WAV decoding error
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raw signal measurements for one analysis frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    /// RMS loudness of the analysis window
    pub rms: f32,
    /// Magnitude-weighted mean frequency in Hz
    pub spectral_centroid: f32,
    /// Geometric / arithmetic mean of the spectrum (0 = tonal, 1 = noise)
    pub spectral_flatness: f32,
    /// Frequency below which 85% of the spectral energy lies, in Hz
    pub spectral_rolloff: f32,
    /// Sign changes per sample (0.0 - 1.0)
    pub zero_crossing_rate: f32,
}

/// Beat and tempo estimate derived from the rolling energy history
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BeatInfo {
    /// Estimated tempo in BPM (None until enough consistent onsets)
    pub tempo: Option<f32>,
    /// Tempo confidence (0.0 - 1.0)
    pub confidence: f32,
    /// Timestamp of the most recent onset, in seconds
    pub last_beat_time: Option<f64>,
    /// An onset was detected on this tick
    pub is_beat: bool,
}

/// Smoothed, normalized projections of [`AudioFeatures`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    /// Normalized loudness (0.0 - 1.0)
    pub energy: f32,
    /// Normalized spectral centroid (0.0 - 1.0)
    pub brightness: f32,
    /// Spectral flatness (0.0 - 1.0)
    pub texture: f32,
    /// Rate of change of `energy`, per second
    pub energy_derivative: f32,
    /// Rolling peak of `energy` with decay (0.0 - 1.0)
    pub peak_energy: f32,
}

/// Everything the mapping engine needs for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisState {
    /// Stream time of this tick, in seconds
    pub timestamp: f64,
    pub features: AudioFeatures,
    pub beat: BeatInfo,
    pub derived: DerivedMetrics,
}

impl AnalysisState {
    /// Neutral state: silence, no beat
    pub fn silent() -> Self {
        Self::default()
    }

    /// Convenience for driving the mapping engine directly
    pub fn with_energy(energy: f32) -> Self {
        let mut state = Self::default();
        state.derived.energy = energy;
        state.derived.peak_energy = energy;
        state
    }

    /// Mark this tick as a beat
    pub fn with_beat(mut self, is_beat: bool) -> Self {
        self.beat.is_beat = is_beat;
        if is_beat {
            self.beat.last_beat_time = Some(self.timestamp);
        }
        self
    }
}

/// Smoothing and clamping applied to raw features before mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationConfig {
    /// Energy attack time constant in seconds
    pub energy_attack: f32,
    /// Energy release time constant in seconds
    pub energy_release: f32,
    /// Brightness attack time constant in seconds
    pub brightness_attack: f32,
    /// Brightness release time constant in seconds
    pub brightness_release: f32,
    /// Texture smoothing time constant in seconds
    pub texture_smoothing: f32,
    /// RMS that maps to energy 1.0
    pub reference_rms: f32,
    /// Centroid frequency (Hz) that maps to brightness 1.0
    pub reference_centroid_hz: f32,
    /// Absolute clamp for `energy_derivative`
    pub derivative_clamp: f32,
    /// Peak decay per second (multiplicative)
    pub peak_decay_per_sec: f32,
    /// Lower clamp for normalized outputs
    pub min_value: f32,
    /// Upper clamp for normalized outputs
    pub max_value: f32,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            energy_attack: 0.02,
            energy_release: 0.25,
            brightness_attack: 0.05,
            brightness_release: 0.3,
            texture_smoothing: 0.2,
            reference_rms: 0.35,
            reference_centroid_hz: 5000.0,
            derivative_clamp: 20.0,
            peak_decay_per_sec: 0.5,
            min_value: 0.0,
            max_value: 1.0,
        }
    }
}

impl NormalizationConfig {
    /// No smoothing at all; outputs follow the raw features. Used in tests.
    pub fn immediate() -> Self {
        Self {
            energy_attack: 0.0,
            energy_release: 0.0,
            brightness_attack: 0.0,
            brightness_release: 0.0,
            texture_smoothing: 0.0,
            ..Self::default()
        }
    }

    /// Clamp a normalized value into `[min_value, max_value]`
    pub fn clamp(&self, value: f32) -> f32 {
        if value.is_finite() {
            value.clamp(self.min_value, self.max_value)
        } else {
            self.min_value
        }
    }
}

/// One-pole smoothing step with separate attack/release time constants.
///
/// A time constant of zero (or less) jumps straight to the target.
pub fn smooth_step(current: f32, target: f32, dt: f32, attack: f32, release: f32) -> f32 {
    let tau = if target > current { attack } else { release };
    if tau <= 0.0 || dt <= 0.0 {
        return target;
    }
    let alpha = 1.0 - (-dt / tau).exp();
    current + (target - current) * alpha
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smooth_step_attack_faster_than_release() {
        let dt = 0.01;
        let up = smooth_step(0.0, 1.0, dt, 0.02, 0.25);
        let down = 1.0 - smooth_step(1.0, 0.0, dt, 0.02, 0.25);
        assert!(up > down, "attack {} should exceed release {}", up, down);
    }

    #[test]
    fn test_smooth_step_zero_time_constant_is_immediate() {
        assert_eq!(smooth_step(0.2, 0.9, 0.01, 0.0, 0.0), 0.9);
    }

    #[test]
    fn test_normalization_clamp_handles_nan() {
        let config = NormalizationConfig::default();
        assert_eq!(config.clamp(f32::NAN), 0.0);
        assert_eq!(config.clamp(4.0), 1.0);
        assert_eq!(config.clamp(-1.0), 0.0);
    }

    #[test]
    fn test_silent_state_is_neutral() {
        let state = AnalysisState::silent();
        assert_eq!(state.derived.energy, 0.0);
        assert!(!state.beat.is_beat);
        assert!(state.beat.tempo.is_none());
    }
}

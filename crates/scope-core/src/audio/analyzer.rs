//! FFT-based audio analyzer
//!
//! Buffers incoming samples in a ring buffer and runs one analysis tick per
//! hop (after the first full window). Each tick produces a complete
//! [`AnalysisState`]: raw features, beat info and smoothed metrics.

use super::beat::{BeatConfig, BeatTracker};
use super::features::{self, ROLLOFF_FRACTION};
use super::{smooth_step, AnalysisState, AudioFeatures, DerivedMetrics, NormalizationConfig};
use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

/// Configuration for [`AudioAnalyzer`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Sample rate of the incoming mono stream
    pub sample_rate: u32,
    /// FFT size (power of 2)
    pub fft_size: usize,
    /// Overlap ratio (0.0 - 1.0, typically 0.5)
    pub overlap: f32,
    /// Smoothing and clamping of derived metrics
    #[serde(default)]
    pub normalization: NormalizationConfig,
    /// Beat estimator coefficients
    #[serde(default)]
    pub beat: BeatConfig,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            fft_size: 1024,
            overlap: 0.5,
            normalization: NormalizationConfig::default(),
            beat: BeatConfig::default(),
        }
    }
}

impl AnalyzerConfig {
    fn hop_size(&self) -> usize {
        (((1.0 - self.overlap) * self.fft_size as f32) as usize).max(1)
    }
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| {
            let t = i as f32 / (size.max(2) - 1) as f32;
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * t).cos())
        })
        .collect()
}

/// Streaming analyzer producing one [`AnalysisState`] per hop
pub struct AudioAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    config: AnalyzerConfig,

    /// Ring buffer holding the last `fft_size` samples
    input_buffer: Vec<f32>,
    buffer_write_pos: usize,
    samples_since_tick: usize,
    hop_size: usize,

    /// Unwrapped copy of the ring buffer for time-domain features
    time_buffer: Vec<f32>,
    fft_buffer: Vec<Complex<f32>>,
    scratch_buffer: Vec<Complex<f32>>,
    window: Vec<f32>,
    magnitude_buffer: Vec<f32>,

    beat: BeatTracker,
    derived: DerivedMetrics,
    latest: AnalysisState,

    total_samples: u64,
    tick_count: u64,
}

impl AudioAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        let fft_size = config.fft_size;
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        let hop_size = config.hop_size();

        debug!(
            "AudioAnalyzer created: sample_rate={}, fft_size={}, hop_size={}",
            config.sample_rate, fft_size, hop_size
        );

        Self {
            fft,
            input_buffer: vec![0.0; fft_size],
            buffer_write_pos: 0,
            samples_since_tick: 0,
            hop_size,
            time_buffer: vec![0.0; fft_size],
            fft_buffer: vec![Complex::new(0.0, 0.0); fft_size],
            scratch_buffer: vec![Complex::new(0.0, 0.0); fft_size],
            window: hann_window(fft_size),
            magnitude_buffer: vec![0.0; fft_size / 2],
            beat: BeatTracker::new(config.beat.clone()),
            derived: DerivedMetrics::default(),
            latest: AnalysisState::default(),
            total_samples: 0,
            tick_count: 0,
            config,
        }
    }

    /// Feed mono samples; returns the ticks completed by this chunk, in order.
    pub fn process_samples(&mut self, samples: &[f32]) -> Vec<AnalysisState> {
        let mut ticks = Vec::new();
        if samples.is_empty() {
            return ticks;
        }

        let samples = features::sanitize(samples);
        let fft_size = self.config.fft_size;

        for &sample in &samples {
            self.input_buffer[self.buffer_write_pos] = sample;
            self.buffer_write_pos = (self.buffer_write_pos + 1) % fft_size;
            self.samples_since_tick += 1;
            self.total_samples += 1;

            if self.samples_since_tick >= self.hop_size && self.total_samples >= fft_size as u64 {
                let state = self.tick();
                ticks.push(state);
                self.samples_since_tick = 0;
            }
        }

        // Log roughly once per second of audio
        let sr = self.config.sample_rate.max(1) as u64;
        if self.total_samples % sr < samples.len() as u64 {
            debug!(
                "Audio: processed {}k samples, {} ticks, energy={:.3}, tempo={:?}",
                self.total_samples / 1000,
                self.tick_count,
                self.derived.energy,
                self.latest.beat.tempo
            );
        }

        ticks
    }

    /// Seconds between ticks
    pub fn tick_period(&self) -> f64 {
        self.hop_size as f64 / self.config.sample_rate.max(1) as f64
    }

    fn tick(&mut self) -> AnalysisState {
        self.tick_count += 1;
        let fft_size = self.config.fft_size;
        let timestamp = self.total_samples as f64 / self.config.sample_rate.max(1) as f64;
        let dt = self.tick_period();

        // The write position is where we write next, so the oldest sample is there
        for i in 0..fft_size {
            let sample = self.input_buffer[(self.buffer_write_pos + i) % fft_size];
            self.time_buffer[i] = sample;
            self.fft_buffer[i] = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft
            .process_with_scratch(&mut self.fft_buffer, &mut self.scratch_buffer);

        let norm_factor = 1.0 / (fft_size as f32).sqrt();
        for (i, magnitude) in self.magnitude_buffer.iter_mut().enumerate() {
            let m = self.fft_buffer[i].norm() * norm_factor;
            *magnitude = if m.is_finite() { m } else { 0.0 };
        }

        let bin_width = self.config.sample_rate as f32 / fft_size as f32;
        let features = AudioFeatures {
            rms: features::calculate_rms(&self.time_buffer),
            spectral_centroid: features::spectral_centroid(&self.magnitude_buffer, bin_width),
            spectral_flatness: features::spectral_flatness(&self.magnitude_buffer),
            spectral_rolloff: features::spectral_rolloff(
                &self.magnitude_buffer,
                bin_width,
                ROLLOFF_FRACTION,
            ),
            zero_crossing_rate: features::zero_crossing_rate(&self.time_buffer),
        };

        let beat = self.beat.update(features.rms, timestamp, dt);
        self.update_derived(&features, dt as f32);

        let state = AnalysisState {
            timestamp,
            features,
            beat,
            derived: self.derived,
        };

        if self.tick_count % 100 == 0 {
            trace!(
                "Tick #{}: rms={:.4} centroid={:.0}Hz beat={}",
                self.tick_count,
                features.rms,
                features.spectral_centroid,
                beat.is_beat
            );
        }

        self.latest = state;
        state
    }

    fn update_derived(&mut self, features: &AudioFeatures, dt: f32) {
        let norm = &self.config.normalization;

        let raw_energy = norm.clamp(features.rms / norm.reference_rms.max(f32::EPSILON));
        let raw_brightness =
            norm.clamp(features.spectral_centroid / norm.reference_centroid_hz.max(1.0));
        let raw_texture = norm.clamp(features.spectral_flatness);

        let previous_energy = self.derived.energy;
        let energy = norm.clamp(smooth_step(
            previous_energy,
            raw_energy,
            dt,
            norm.energy_attack,
            norm.energy_release,
        ));
        let brightness = norm.clamp(smooth_step(
            self.derived.brightness,
            raw_brightness,
            dt,
            norm.brightness_attack,
            norm.brightness_release,
        ));
        let texture = norm.clamp(smooth_step(
            self.derived.texture,
            raw_texture,
            dt,
            norm.texture_smoothing,
            norm.texture_smoothing,
        ));

        let energy_derivative = if dt > 0.0 {
            ((energy - previous_energy) / dt).clamp(-norm.derivative_clamp, norm.derivative_clamp)
        } else {
            0.0
        };

        let decayed_peak = self.derived.peak_energy * norm.peak_decay_per_sec.powf(dt);
        let peak_energy = norm.clamp(decayed_peak.max(energy));

        self.derived = DerivedMetrics {
            energy,
            brightness,
            texture,
            energy_derivative,
            peak_energy,
        };
    }

    /// Most recent tick (silent default before the first full window)
    pub fn latest(&self) -> AnalysisState {
        self.latest
    }

    pub fn reset(&mut self) {
        self.input_buffer.fill(0.0);
        self.time_buffer.fill(0.0);
        self.buffer_write_pos = 0;
        self.samples_since_tick = 0;
        self.magnitude_buffer.fill(0.0);
        self.beat.reset();
        self.derived = DerivedMetrics::default();
        self.latest = AnalysisState::default();
        self.total_samples = 0;
        self.tick_count = 0;

        debug!("AudioAnalyzer reset");
    }

    /// Update configuration (e.g. when the source sample rate changes).
    /// Resets all analysis state.
    pub fn update_config(&mut self, config: AnalyzerConfig) {
        if config.fft_size != self.config.fft_size {
            let mut planner = FftPlanner::new();
            self.fft = planner.plan_fft_forward(config.fft_size);
            self.input_buffer = vec![0.0; config.fft_size];
            self.time_buffer = vec![0.0; config.fft_size];
            self.fft_buffer = vec![Complex::new(0.0, 0.0); config.fft_size];
            self.scratch_buffer = vec![Complex::new(0.0, 0.0); config.fft_size];
            self.magnitude_buffer = vec![0.0; config.fft_size / 2];
            self.window = hann_window(config.fft_size);
        }

        self.hop_size = config.hop_size();
        self.beat = BeatTracker::new(config.beat.clone());
        self.config = config;
        self.reset();

        debug!("AudioAnalyzer config updated, hop_size={}", self.hop_size);
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }
}

//! Beat and tempo estimation
//!
//! Onsets are local energy rises above an adaptive threshold (a multiple of
//! the rolling mean). Tempo comes from clustering inter-onset intervals after
//! folding them into the configured BPM range; the largest cluster wins and
//! its share of all intervals is the confidence.

use super::BeatInfo;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::trace;

/// Tunable beat-estimator coefficients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeatConfig {
    /// Rolling energy history length, in ticks
    pub history_len: usize,
    /// Ticks of history required before onsets are reported
    pub min_history: usize,
    /// Onset when energy exceeds `mean * threshold_multiplier`
    pub threshold_multiplier: f32,
    /// Absolute floor for the adaptive threshold
    pub min_onset_energy: f32,
    /// Minimum seconds between onsets (prevents double triggers)
    pub min_beat_interval: f64,
    /// Relative tolerance for two intervals to share a cluster
    pub interval_tolerance: f64,
    /// Onsets required before a tempo is reported
    pub min_onsets: usize,
    /// Onsets kept for tempo estimation
    pub max_onsets: usize,
    /// Seconds for confidence to fall from 1.0 to 0.0 once onsets stop matching
    pub confidence_decay_secs: f64,
    /// Lower bound of the tempo range (BPM)
    pub min_bpm: f32,
    /// Upper bound of the tempo range (BPM)
    pub max_bpm: f32,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            history_len: 43,
            min_history: 8,
            threshold_multiplier: 1.5,
            min_onset_energy: 0.01,
            min_beat_interval: 0.2,
            interval_tolerance: 0.08,
            min_onsets: 4,
            max_onsets: 16,
            confidence_decay_secs: 4.0,
            min_bpm: 60.0,
            max_bpm: 200.0,
        }
    }
}

/// Tempo estimate from a set of onset times
#[derive(Debug, Clone, Copy, PartialEq)]
struct TempoEstimate {
    bpm: f32,
    confidence: f32,
    latest_matches: bool,
}

/// Rolling onset detector and tempo tracker
pub struct BeatTracker {
    config: BeatConfig,
    energy_history: VecDeque<f32>,
    previous_energy: f32,
    onset_times: VecDeque<f64>,
    last_beat: Option<f64>,
    last_matching_onset: Option<f64>,
    tempo: Option<f32>,
    confidence: f32,
}

impl BeatTracker {
    pub fn new(config: BeatConfig) -> Self {
        Self {
            energy_history: VecDeque::with_capacity(config.history_len),
            onset_times: VecDeque::with_capacity(config.max_onsets),
            config,
            previous_energy: 0.0,
            last_beat: None,
            last_matching_onset: None,
            tempo: None,
            confidence: 0.0,
        }
    }

    pub fn config(&self) -> &BeatConfig {
        &self.config
    }

    /// Feed one tick of frame energy. `dt` is the tick period in seconds.
    pub fn update(&mut self, energy: f32, timestamp: f64, dt: f64) -> BeatInfo {
        let energy = if energy.is_finite() { energy.max(0.0) } else { 0.0 };

        self.energy_history.push_back(energy);
        while self.energy_history.len() > self.config.history_len {
            self.energy_history.pop_front();
        }

        let is_beat = self.detect_onset(energy, timestamp);
        self.previous_energy = energy;

        if is_beat {
            self.register_onset(timestamp);
        }

        self.decay_confidence(timestamp, dt);

        BeatInfo {
            tempo: self.tempo,
            confidence: self.confidence,
            last_beat_time: self.last_beat,
            is_beat,
        }
    }

    fn detect_onset(&self, energy: f32, timestamp: f64) -> bool {
        if self.energy_history.len() < self.config.min_history {
            return false;
        }

        let mean = self.energy_history.iter().sum::<f32>() / self.energy_history.len() as f32;
        let threshold = (mean * self.config.threshold_multiplier).max(self.config.min_onset_energy);

        let cooled_down = self
            .last_beat
            .map_or(true, |t| timestamp - t >= self.config.min_beat_interval);

        energy > threshold && energy > self.previous_energy && cooled_down
    }

    fn register_onset(&mut self, timestamp: f64) {
        self.last_beat = Some(timestamp);
        self.onset_times.push_back(timestamp);
        while self.onset_times.len() > self.config.max_onsets {
            self.onset_times.pop_front();
        }

        if let Some(estimate) = self.estimate_tempo() {
            if estimate.latest_matches {
                self.last_matching_onset = Some(timestamp);
            }
            self.tempo = Some(estimate.bpm);
            self.confidence = estimate.confidence;
            trace!(
                "Onset at {:.3}s: tempo={:.1} confidence={:.2}",
                timestamp,
                estimate.bpm,
                estimate.confidence
            );
        }
    }

    /// Linear decay once the expected next onset is overdue
    fn decay_confidence(&mut self, timestamp: f64, dt: f64) {
        let Some(bpm) = self.tempo else {
            return;
        };
        let expected = 60.0 / bpm as f64;
        let since = self
            .last_matching_onset
            .or(self.last_beat)
            .map_or(0.0, |t| timestamp - t);

        if since <= expected * (1.0 + self.config.interval_tolerance) {
            return;
        }

        let step = if self.config.confidence_decay_secs > 0.0 {
            (dt / self.config.confidence_decay_secs) as f32
        } else {
            1.0
        };
        self.confidence = (self.confidence - step).max(0.0);

        if self.confidence <= 0.0 {
            trace!("Tempo confidence exhausted at {:.3}s, resetting", timestamp);
            self.tempo = None;
            self.onset_times.clear();
            self.last_matching_onset = None;
        }
    }

    /// Fold an interval into the configured tempo range by halving/doubling
    fn fold_interval(&self, mut interval: f64) -> Option<f64> {
        let shortest = 60.0 / self.config.max_bpm as f64;
        let longest = 60.0 / self.config.min_bpm as f64;
        if interval <= 0.0 {
            return None;
        }
        for _ in 0..4 {
            if interval < shortest {
                interval *= 2.0;
            } else if interval > longest {
                interval /= 2.0;
            } else {
                return Some(interval);
            }
        }
        (shortest..=longest).contains(&interval).then_some(interval)
    }

    fn estimate_tempo(&self) -> Option<TempoEstimate> {
        if self.onset_times.len() < self.config.min_onsets {
            return None;
        }

        let intervals: Vec<f64> = self
            .onset_times
            .iter()
            .zip(self.onset_times.iter().skip(1))
            .filter_map(|(a, b)| self.fold_interval(b - a))
            .collect();

        if intervals.is_empty() {
            return None;
        }

        let tolerance = self.config.interval_tolerance;
        let in_cluster = |center: f64, x: f64| ((x - center) / center).abs() <= tolerance;

        // Largest cluster wins; ties keep the earliest center
        let mut best_center = intervals[0];
        let mut best_count = 0;
        for &center in &intervals {
            let count = intervals.iter().filter(|&&x| in_cluster(center, x)).count();
            if count > best_count {
                best_count = count;
                best_center = center;
            }
        }

        let members: Vec<f64> = intervals
            .iter()
            .copied()
            .filter(|&x| in_cluster(best_center, x))
            .collect();
        let mean = members.iter().sum::<f64>() / members.len() as f64;
        if mean <= 0.001 {
            return None;
        }

        let bpm = (60.0 / mean) as f32;
        let latest_matches = intervals
            .last()
            .map_or(false, |&x| in_cluster(best_center, x));

        Some(TempoEstimate {
            bpm: (bpm * 10.0).round() / 10.0,
            confidence: members.len() as f32 / intervals.len() as f32,
            latest_matches,
        })
    }

    pub fn reset(&mut self) {
        self.energy_history.clear();
        self.onset_times.clear();
        self.previous_energy = 0.0;
        self.last_beat = None;
        self.last_matching_onset = None;
        self.tempo = None;
        self.confidence = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f64 = 0.01;

    /// Drive the tracker with a pulse train: `pulse` energy for one tick every
    /// `interval` seconds, silence otherwise.
    fn drive(tracker: &mut BeatTracker, start: f64, seconds: f64, interval: f64) -> Vec<BeatInfo> {
        let ticks = (seconds / DT).round() as usize;
        let interval_ticks = (interval / DT).round() as usize;
        (0..ticks)
            .map(|i| {
                let t = start + i as f64 * DT;
                let energy = if interval_ticks > 0 && i % interval_ticks == 0 {
                    0.8
                } else {
                    0.0
                };
                tracker.update(energy, t, DT)
            })
            .collect()
    }

    #[test]
    fn test_no_beats_before_history_fills() {
        let mut tracker = BeatTracker::new(BeatConfig::default());
        let info = tracker.update(1.0, 0.0, DT);
        assert!(!info.is_beat);
    }

    #[test]
    fn test_tempo_none_until_min_onsets() {
        let mut tracker = BeatTracker::new(BeatConfig::default());
        // Fill history with silence
        drive(&mut tracker, 0.0, 0.1, 0.0);
        // Two onsets only
        let infos = drive(&mut tracker, 0.1, 0.9, 0.5);
        assert_eq!(infos.iter().filter(|i| i.is_beat).count(), 2);
        assert!(infos.last().unwrap().tempo.is_none());
    }

    #[test]
    fn test_steady_pulse_gives_tempo() {
        let mut tracker = BeatTracker::new(BeatConfig::default());
        drive(&mut tracker, 0.0, 0.1, 0.0);
        let infos = drive(&mut tracker, 0.1, 5.0, 0.5);
        let last = infos.last().unwrap();
        let tempo = last.tempo.expect("tempo should be estimated");
        assert!((tempo - 120.0).abs() < 1.0, "tempo was {}", tempo);
        assert!(last.confidence > 0.9);
    }

    #[test]
    fn test_cooldown_prevents_double_trigger() {
        let mut tracker = BeatTracker::new(BeatConfig::default());
        drive(&mut tracker, 0.0, 0.1, 0.0);
        // Pulses every 50ms are faster than the 200ms cooldown
        let infos = drive(&mut tracker, 0.1, 1.0, 0.05);
        let beats: Vec<f64> = infos
            .iter()
            .filter(|i| i.is_beat)
            .filter_map(|i| i.last_beat_time)
            .collect();
        for pair in beats.windows(2) {
            assert!(pair[1] - pair[0] >= 0.2 - 1e-9);
        }
    }

    #[test]
    fn test_confidence_decays_to_zero_after_configured_time() {
        let config = BeatConfig {
            confidence_decay_secs: 2.0,
            ..Default::default()
        };
        let mut tracker = BeatTracker::new(config);
        drive(&mut tracker, 0.0, 0.1, 0.0);
        drive(&mut tracker, 0.1, 4.0, 0.5);
        assert!(tracker.confidence > 0.9);

        // Silence: overdue after ~0.54s, then 2s of decay
        let infos = drive(&mut tracker, 4.1, 3.0, 0.0);
        let last = infos.last().unwrap();
        assert_eq!(last.confidence, 0.0);
        assert!(last.tempo.is_none());

        // Still non-zero shortly after the pulses stop
        let mut tracker = BeatTracker::new(BeatConfig {
            confidence_decay_secs: 2.0,
            ..Default::default()
        });
        drive(&mut tracker, 0.0, 0.1, 0.0);
        drive(&mut tracker, 0.1, 4.0, 0.5);
        let infos = drive(&mut tracker, 4.1, 1.0, 0.0);
        assert!(infos.last().unwrap().confidence > 0.0);
    }

    #[test]
    fn test_fold_interval_into_range() {
        let tracker = BeatTracker::new(BeatConfig::default());
        // 0.25s (240 BPM) doubles to 0.5s
        assert_eq!(tracker.fold_interval(0.25), Some(0.5));
        // 1.5s (40 BPM) halves to 0.75s
        assert_eq!(tracker.fold_interval(1.5), Some(0.75));
        assert_eq!(tracker.fold_interval(0.0), None);
    }

    #[test]
    fn test_reset_clears_tempo() {
        let mut tracker = BeatTracker::new(BeatConfig::default());
        drive(&mut tracker, 0.0, 0.1, 0.0);
        drive(&mut tracker, 0.1, 3.0, 0.5);
        tracker.reset();
        let info = tracker.update(0.0, 10.0, DT);
        assert!(info.tempo.is_none());
        assert_eq!(info.confidence, 0.0);
        assert!(info.last_beat_time.is_none());
    }
}

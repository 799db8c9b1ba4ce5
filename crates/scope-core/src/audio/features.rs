//! Per-frame feature extraction
//!
//! Plain functions over a time-domain window or a magnitude spectrum.
//! Silence yields zeros rather than NaN.

/// Magnitudes below this sum count as silence
const SILENCE_EPSILON: f32 = 1e-9;

/// Fraction of spectral energy used for rolloff
pub const ROLLOFF_FRACTION: f32 = 0.85;

/// Replace NaN/Inf with 0.0
pub fn sanitize(samples: &[f32]) -> Vec<f32> {
    samples
        .iter()
        .map(|&s| if s.is_finite() { s } else { 0.0 })
        .collect()
}

/// Root mean square of the samples
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Sign changes per sample pair
pub fn zero_crossing_rate(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f32 / (samples.len() - 1) as f32
}

/// Magnitude-weighted mean frequency in Hz
pub fn spectral_centroid(magnitudes: &[f32], bin_width: f32) -> f32 {
    let total: f32 = magnitudes.iter().sum();
    if total <= SILENCE_EPSILON {
        return 0.0;
    }
    let weighted: f32 = magnitudes
        .iter()
        .enumerate()
        .map(|(i, m)| i as f32 * bin_width * m)
        .sum();
    weighted / total
}

/// Wiener entropy: geometric mean over arithmetic mean
pub fn spectral_flatness(magnitudes: &[f32]) -> f32 {
    if magnitudes.is_empty() {
        return 0.0;
    }
    let n = magnitudes.len() as f32;
    let arithmetic = magnitudes.iter().sum::<f32>() / n;
    if arithmetic <= SILENCE_EPSILON {
        return 0.0;
    }
    let log_mean = magnitudes
        .iter()
        .map(|m| (m + SILENCE_EPSILON).ln())
        .sum::<f32>()
        / n;
    (log_mean.exp() / arithmetic).clamp(0.0, 1.0)
}

/// Frequency below which `fraction` of the spectral energy lies
pub fn spectral_rolloff(magnitudes: &[f32], bin_width: f32, fraction: f32) -> f32 {
    let total: f32 = magnitudes.iter().map(|m| m * m).sum();
    if total <= SILENCE_EPSILON {
        return 0.0;
    }
    let target = total * fraction;
    let mut cumulative = 0.0;
    for (i, m) in magnitudes.iter().enumerate() {
        cumulative += m * m;
        if cumulative >= target {
            return i as f32 * bin_width;
        }
    }
    (magnitudes.len().saturating_sub(1)) as f32 * bin_width
}

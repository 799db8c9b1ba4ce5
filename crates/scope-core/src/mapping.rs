//! Mapping engine: audio analysis + theme -> generation parameters
//!
//! [`compute_parameters`] is a pure function. Everything it needs is in its
//! arguments, so the same inputs always give the same output.

use crate::audio::AnalysisState;
use crate::parameters::{PromptEntry, ScopeParameters, DEFAULT_PROMPT_WEIGHT};
use crate::theme::{BeatAction, NoiseScaleRange, Theme, ThemeRanges, VariationTrigger};

/// Clamp into [0, 1]; NaN becomes 0
fn unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Compute the parameters for one analysis tick
///
/// `previous` supplies state the audio does not drive: the pause flag and
/// VACE settings are carried over unchanged.
pub fn compute_parameters(
    theme: &Theme,
    state: &AnalysisState,
    previous: Option<&ScopeParameters>,
) -> ScopeParameters {
    let energy = unit(state.derived.energy);
    let brightness = unit(state.derived.brightness);

    let beat_action = theme
        .beat
        .map(|b| b.action)
        .filter(|action| *action != BeatAction::None);
    // Themes without a beat action never look at the beat flag
    let beat_action = beat_action.filter(|_| state.beat.is_beat);

    let mut params = ScopeParameters {
        prompts: compose_prompts(theme, energy, brightness),
        noise_scale: noise_scale(theme, energy, beat_action == Some(BeatAction::NoisePulse)),
        denoising_step_list: denoising_steps(&theme.ranges, energy),
        manage_cache: true,
        paused: previous.map_or(false, |p| p.paused),
        reset_cache: (beat_action == Some(BeatAction::CacheReset)).then_some(true),
        vace_ref_images: None,
        vace_context_scale: None,
    };

    if let Some(prev) = previous {
        params.vace_ref_images = prev.vace_ref_images.clone();
        params.vace_context_scale = prev.vace_context_scale;
    }

    params
}

/// Pick or interpolate the denoising step list for `energy`
///
/// At or below the low threshold the `min` list is returned verbatim, at or
/// above the high threshold the `max` list. In between, lists of equal
/// length are interpolated element-wise; unequal lists switch at the
/// midpoint.
pub fn denoising_steps(ranges: &ThemeRanges, energy: f32) -> Vec<u32> {
    let energy = unit(energy);
    let steps = &ranges.denoising_steps;
    let (low, high) = (ranges.low_energy_threshold, ranges.high_energy_threshold);

    if energy <= low {
        return steps.min.clone();
    }
    if energy >= high {
        return steps.max.clone();
    }

    if steps.min.len() != steps.max.len() {
        return if energy < ranges.midpoint() {
            steps.min.clone()
        } else {
            steps.max.clone()
        };
    }

    let t = (energy - low) / (high - low);
    steps
        .min
        .iter()
        .zip(&steps.max)
        .map(|(&a, &b)| {
            let v = a as f32 + (b as f32 - a as f32) * t;
            v.round().max(0.0) as u32
        })
        .collect()
}

/// Range bounds as `(lo, hi)` with `lo <= hi`
///
/// A NaN bound collapses onto the other one; two NaN bounds give zero.
fn ordered_bounds(range: NoiseScaleRange) -> (f32, f32) {
    match (range.min.is_nan(), range.max.is_nan()) {
        (false, false) => (range.min.min(range.max), range.min.max(range.max)),
        (true, false) => (range.max, range.max),
        (false, true) => (range.min, range.min),
        (true, true) => (0.0, 0.0),
    }
}

/// Noise scale within the theme range, plus the beat pulse when active
pub fn noise_scale(theme: &Theme, energy: f32, pulse: bool) -> f32 {
    let (lo, hi) = ordered_bounds(theme.ranges.noise_scale);
    let span = hi - lo;
    let mut value = lo + theme.noise_curve.apply(unit(energy)) * span;

    if pulse {
        let intensity = theme.beat.map_or(0.0, |b| unit(b.intensity));
        value += intensity * span;
    }

    if value.is_nan() {
        return lo;
    }
    value.clamp(lo, hi)
}

/// Base prompt plus every triggered variation
pub fn compose_prompts(theme: &Theme, energy: f32, brightness: f32) -> Vec<PromptEntry> {
    let mut prompts = vec![PromptEntry::weighted(
        theme.base_prompt.clone(),
        DEFAULT_PROMPT_WEIGHT,
    )];

    for variation in &theme.variations {
        let triggered = match variation.trigger {
            VariationTrigger::EnergyAbove(threshold) => energy > threshold,
            VariationTrigger::BrightnessAbove(threshold) => brightness > threshold,
        };
        if triggered {
            prompts.push(PromptEntry::weighted(
                variation.text.clone(),
                variation.weight,
            ));
        }
    }

    prompts
}

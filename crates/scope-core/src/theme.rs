//! Visual themes for Soundscape mode
//!
//! A theme fixes the base prompt and the numeric ranges the mapping engine
//! projects audio onto. Themes are immutable once selected and replaced
//! wholesale on change.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Theme validation and loading errors
#[derive(Error, Debug)]
pub enum ThemeError {
    #[error("Invalid theme '{id}': {reason}")]
    Invalid { id: String, reason: String },

    #[error("Unknown theme: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Theme file parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Noise scale bounds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseScaleRange {
    pub min: f32,
    pub max: f32,
}

/// Denoising step-list presets for the energy extremes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenoisingStepsRange {
    /// Used at or below the low-energy threshold
    pub min: Vec<u32>,
    /// Used at or above the high-energy threshold
    pub max: Vec<u32>,
}

/// Numeric ranges per mapping target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThemeRanges {
    pub noise_scale: NoiseScaleRange,
    pub denoising_steps: DenoisingStepsRange,
    /// Energy at or below which the `min` step list is used verbatim
    #[serde(default = "default_low_energy_threshold")]
    pub low_energy_threshold: f32,
    /// Energy at or above which the `max` step list is used verbatim
    #[serde(default = "default_high_energy_threshold")]
    pub high_energy_threshold: f32,
}

fn default_low_energy_threshold() -> f32 {
    0.3
}

fn default_high_energy_threshold() -> f32 {
    0.7
}

impl ThemeRanges {
    /// Energy halfway between the thresholds
    pub fn midpoint(&self) -> f32 {
        (self.low_energy_threshold + self.high_energy_threshold) / 2.0
    }
}

/// Transfer curve from normalized energy to a range position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MappingCurve {
    #[default]
    Linear,
    /// Slow start, steep finish
    Exponential,
    /// Steep start, slow finish
    Logarithmic,
    /// Smoothstep
    SCurve,
}

impl MappingCurve {
    /// Map `x` in [0, 1] to [0, 1]; out-of-range input is clamped first
    pub fn apply(self, x: f32) -> f32 {
        let x = if x.is_finite() { x.clamp(0.0, 1.0) } else { 0.0 };
        let y = match self {
            Self::Linear => x,
            Self::Exponential => x * x,
            Self::Logarithmic => x.sqrt(),
            Self::SCurve => x * x * (3.0 - 2.0 * x),
        };
        y.clamp(0.0, 1.0)
    }
}

/// What a detected beat does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BeatAction {
    #[default]
    None,
    /// Briefly push noise scale up by `intensity` of the range
    NoisePulse,
    /// One-shot `reset_cache` on the beat tick
    CacheReset,
}

/// Beat-triggered behaviour of a theme
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatMapping {
    pub action: BeatAction,
    /// Pulse strength as a fraction of the noise range
    #[serde(default = "default_beat_intensity")]
    pub intensity: f32,
}

fn default_beat_intensity() -> f32 {
    0.15
}

/// Condition that adds a prompt variation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "when", content = "threshold", rename_all = "snake_case")]
pub enum VariationTrigger {
    EnergyAbove(f32),
    BrightnessAbove(f32),
}

/// Extra prompt text blended in when its trigger holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptVariation {
    pub trigger: VariationTrigger,
    pub text: String,
    #[serde(default = "default_variation_weight")]
    pub weight: f32,
}

fn default_variation_weight() -> f32 {
    crate::parameters::DEFAULT_PROMPT_WEIGHT
}

/// A Soundscape visual theme
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Theme {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub base_prompt: String,
    pub ranges: ThemeRanges,
    #[serde(default)]
    pub noise_curve: MappingCurve,
    #[serde(default)]
    pub beat: Option<BeatMapping>,
    #[serde(default)]
    pub variations: Vec<PromptVariation>,
}

/// How strongly a custom theme follows the music
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReactivityPreset {
    Subtle,
    #[default]
    Balanced,
    Energetic,
    Chaotic,
}

/// Beat behaviour chosen for a custom theme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BeatResponse {
    None,
    #[default]
    Pulse,
    CacheReset,
}

/// Id given to themes built with [`Theme::custom`]
pub const CUSTOM_THEME_ID: &str = "custom";

impl Theme {
    /// Build a theme from free text and two choices. Deterministic.
    pub fn custom(prompt: &str, preset: ReactivityPreset, beat_response: BeatResponse) -> Self {
        let (noise_min, noise_max, low, high, curve, intensity) = match preset {
            ReactivityPreset::Subtle => (0.45, 0.65, 0.35, 0.8, MappingCurve::SCurve, 0.08),
            ReactivityPreset::Balanced => (0.5, 0.8, 0.3, 0.7, MappingCurve::Linear, 0.15),
            ReactivityPreset::Energetic => (0.55, 0.9, 0.25, 0.65, MappingCurve::Logarithmic, 0.25),
            ReactivityPreset::Chaotic => (0.6, 1.0, 0.2, 0.55, MappingCurve::Exponential, 0.35),
        };
        let (min_steps, max_steps) = match preset {
            ReactivityPreset::Subtle => (vec![800, 600, 400, 200], vec![900, 700, 500, 250]),
            ReactivityPreset::Balanced => (vec![850, 600, 400, 200], vec![1000, 750, 500, 250]),
            ReactivityPreset::Energetic => (vec![900, 650, 400, 200], vec![1000, 800, 600, 300]),
            ReactivityPreset::Chaotic => (vec![900, 700, 450, 200], vec![1000, 850, 650, 400]),
        };

        let beat = match beat_response {
            BeatResponse::None => None,
            BeatResponse::Pulse => Some(BeatMapping {
                action: BeatAction::NoisePulse,
                intensity,
            }),
            BeatResponse::CacheReset => Some(BeatMapping {
                action: BeatAction::CacheReset,
                intensity,
            }),
        };

        let variations = match preset {
            ReactivityPreset::Subtle => Vec::new(),
            _ => vec![PromptVariation {
                trigger: VariationTrigger::EnergyAbove(high),
                text: "dynamic motion, vivid intensity".to_string(),
                weight: 0.6,
            }],
        };

        Self {
            id: CUSTOM_THEME_ID.to_string(),
            name: "Custom".to_string(),
            description: format!("Custom theme ({:?} reactivity)", preset),
            base_prompt: prompt.trim().to_string(),
            ranges: ThemeRanges {
                noise_scale: NoiseScaleRange {
                    min: noise_min,
                    max: noise_max,
                },
                denoising_steps: DenoisingStepsRange {
                    min: min_steps,
                    max: max_steps,
                },
                low_energy_threshold: low,
                high_energy_threshold: high,
            },
            noise_curve: curve,
            beat,
            variations,
        }
    }

    pub fn resets_cache_on_beat(&self) -> bool {
        matches!(
            self.beat,
            Some(BeatMapping {
                action: BeatAction::CacheReset,
                ..
            })
        )
    }

    pub fn validate(&self) -> Result<(), ThemeError> {
        let invalid = |reason: &str| ThemeError::Invalid {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.is_empty() {
            return Err(invalid("id cannot be empty"));
        }
        if self.base_prompt.trim().is_empty() {
            return Err(invalid("base prompt cannot be empty"));
        }

        let noise = &self.ranges.noise_scale;
        if !(noise.min.is_finite() && noise.max.is_finite()) || noise.min > noise.max {
            return Err(invalid("noise_scale.min must be <= noise_scale.max"));
        }

        let (low, high) = (
            self.ranges.low_energy_threshold,
            self.ranges.high_energy_threshold,
        );
        if !(0.0..=1.0).contains(&low) || !(0.0..=1.0).contains(&high) || low >= high {
            return Err(invalid("energy thresholds must satisfy 0 <= low < high <= 1"));
        }

        for (label, list) in [
            ("min", &self.ranges.denoising_steps.min),
            ("max", &self.ranges.denoising_steps.max),
        ] {
            if list.is_empty() {
                return Err(invalid(&format!("denoising_steps.{} cannot be empty", label)));
            }
            if list.windows(2).any(|w| w[0] <= w[1]) {
                return Err(invalid(&format!(
                    "denoising_steps.{} must be strictly descending",
                    label
                )));
            }
        }

        Ok(())
    }
}

fn steps(values: &[u32]) -> Vec<u32> {
    values.to_vec()
}

/// Themes shipped with the client
pub fn builtin_themes() -> Vec<Theme> {
    vec![
        Theme {
            id: "cosmic-voyage".to_string(),
            name: "Cosmic Voyage".to_string(),
            description: "Drifting nebulae and starfields that surge with the music".to_string(),
            base_prompt: "a voyage through deep space, swirling nebulae, distant galaxies, \
                          cinematic starlight"
                .to_string(),
            ranges: ThemeRanges {
                noise_scale: NoiseScaleRange { min: 0.5, max: 0.8 },
                denoising_steps: DenoisingStepsRange {
                    min: steps(&[850, 600, 400, 200]),
                    max: steps(&[1000, 750, 500, 250]),
                },
                low_energy_threshold: 0.3,
                high_energy_threshold: 0.7,
            },
            noise_curve: MappingCurve::Linear,
            beat: Some(BeatMapping {
                action: BeatAction::NoisePulse,
                intensity: 0.15,
            }),
            variations: vec![PromptVariation {
                trigger: VariationTrigger::EnergyAbove(0.75),
                text: "supernova bursts, blazing light".to_string(),
                weight: 0.7,
            }],
        },
        Theme {
            id: "neon-foundry".to_string(),
            name: "Neon Foundry".to_string(),
            description: "Industrial forge glowing with neon sparks, resets on every beat"
                .to_string(),
            base_prompt: "an industrial neon foundry, molten metal, sparks, glowing cyberpunk \
                          machinery"
                .to_string(),
            ranges: ThemeRanges {
                noise_scale: NoiseScaleRange {
                    min: 0.6,
                    max: 0.95,
                },
                denoising_steps: DenoisingStepsRange {
                    min: steps(&[900, 650, 400, 200]),
                    max: steps(&[1000, 800, 600, 300]),
                },
                low_energy_threshold: 0.25,
                high_energy_threshold: 0.7,
            },
            noise_curve: MappingCurve::Exponential,
            beat: Some(BeatMapping {
                action: BeatAction::CacheReset,
                intensity: 0.2,
            }),
            variations: vec![PromptVariation {
                trigger: VariationTrigger::BrightnessAbove(0.6),
                text: "white-hot sparks, strobing neon".to_string(),
                weight: 0.8,
            }],
        },
        Theme {
            id: "digital-forest".to_string(),
            name: "Digital Forest".to_string(),
            description: "Bioluminescent woodland that breathes with the groove".to_string(),
            base_prompt: "a bioluminescent digital forest, glowing plants, floating particles, \
                          soft mist"
                .to_string(),
            ranges: ThemeRanges {
                noise_scale: NoiseScaleRange {
                    min: 0.45,
                    max: 0.7,
                },
                denoising_steps: DenoisingStepsRange {
                    min: steps(&[800, 600, 400, 200]),
                    max: steps(&[950, 700, 500, 250]),
                },
                low_energy_threshold: 0.3,
                high_energy_threshold: 0.75,
            },
            noise_curve: MappingCurve::SCurve,
            beat: None,
            variations: vec![PromptVariation {
                trigger: VariationTrigger::EnergyAbove(0.7),
                text: "fireflies swarming, pulsing light".to_string(),
                weight: 0.6,
            }],
        },
        Theme {
            id: "synthwave-highway".to_string(),
            name: "Synthwave Highway".to_string(),
            description: "Retro neon highway racing toward a wireframe sunset".to_string(),
            base_prompt: "a retro synthwave highway at night, neon grid, wireframe mountains, \
                          magenta sunset"
                .to_string(),
            ranges: ThemeRanges {
                noise_scale: NoiseScaleRange {
                    min: 0.55,
                    max: 0.85,
                },
                denoising_steps: DenoisingStepsRange {
                    min: steps(&[850, 650, 400, 200]),
                    max: steps(&[1000, 800, 550, 300]),
                },
                low_energy_threshold: 0.3,
                high_energy_threshold: 0.7,
            },
            noise_curve: MappingCurve::Logarithmic,
            beat: Some(BeatMapping {
                action: BeatAction::NoisePulse,
                intensity: 0.2,
            }),
            variations: vec![PromptVariation {
                trigger: VariationTrigger::EnergyAbove(0.8),
                text: "speed lines, motion blur".to_string(),
                weight: 0.7,
            }],
        },
        Theme {
            id: "crystal-sanctuary".to_string(),
            name: "Crystal Sanctuary".to_string(),
            description: "Slow, meditative crystal caverns for ambient sets".to_string(),
            base_prompt: "a serene crystal sanctuary, refracted light, prismatic caverns, \
                          calm reflections"
                .to_string(),
            ranges: ThemeRanges {
                noise_scale: NoiseScaleRange { min: 0.4, max: 0.6 },
                denoising_steps: DenoisingStepsRange {
                    min: steps(&[750, 550, 350, 150]),
                    max: steps(&[900, 700, 450, 200]),
                },
                low_energy_threshold: 0.35,
                high_energy_threshold: 0.8,
            },
            noise_curve: MappingCurve::SCurve,
            beat: None,
            variations: vec![PromptVariation {
                trigger: VariationTrigger::BrightnessAbove(0.5),
                text: "shimmering prisms".to_string(),
                weight: 0.5,
            }],
        },
        Theme {
            id: "ocean-depths".to_string(),
            name: "Ocean Depths".to_string(),
            description: "Deep-sea currents and drifting light".to_string(),
            base_prompt: "the deep ocean, drifting jellyfish, shafts of light, slow currents"
                .to_string(),
            ranges: ThemeRanges {
                noise_scale: NoiseScaleRange {
                    min: 0.45,
                    max: 0.75,
                },
                denoising_steps: DenoisingStepsRange {
                    min: steps(&[800, 600, 350, 150]),
                    max: steps(&[950, 750, 500, 250]),
                },
                low_energy_threshold: 0.3,
                high_energy_threshold: 0.7,
            },
            noise_curve: MappingCurve::Linear,
            beat: Some(BeatMapping {
                action: BeatAction::NoisePulse,
                intensity: 0.1,
            }),
            variations: Vec::new(),
        },
    ]
}

/// File layout for user theme files: a list of `[[theme]]` tables
#[derive(Debug, Default, Serialize, Deserialize)]
struct ThemeFile {
    #[serde(default, rename = "theme")]
    themes: Vec<Theme>,
}

/// Built-in themes plus any loaded from disk
#[derive(Debug, Clone)]
pub struct ThemeCatalog {
    themes: Vec<Theme>,
}

impl Default for ThemeCatalog {
    fn default() -> Self {
        Self {
            themes: builtin_themes(),
        }
    }
}

impl ThemeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn themes(&self) -> &[Theme] {
        &self.themes
    }

    pub fn get(&self, id: &str) -> Option<&Theme> {
        self.themes.iter().find(|t| t.id == id)
    }

    pub fn require(&self, id: &str) -> Result<&Theme, ThemeError> {
        self.get(id).ok_or_else(|| ThemeError::NotFound(id.to_string()))
    }

    /// Add or replace a theme by id
    pub fn insert(&mut self, theme: Theme) -> Result<(), ThemeError> {
        theme.validate()?;
        match self.themes.iter_mut().find(|t| t.id == theme.id) {
            Some(existing) => *existing = theme,
            None => self.themes.push(theme),
        }
        Ok(())
    }

    /// Parse themes from TOML text
    pub fn load_str(&mut self, contents: &str) -> Result<usize, ThemeError> {
        let file: ThemeFile = toml::from_str(contents)?;
        let count = file.themes.len();
        for theme in file.themes {
            self.insert(theme)?;
        }
        Ok(count)
    }

    /// Load additional themes from a TOML file
    pub fn load_file(&mut self, path: &Path) -> Result<usize, ThemeError> {
        let contents = fs::read_to_string(path)?;
        let count = self.load_str(&contents)?;
        info!("Loaded {} themes from {}", count, path.display());
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_themes_are_valid() {
        for theme in builtin_themes() {
            theme.validate().unwrap();
        }
    }

    #[test]
    fn test_builtin_ids_unique() {
        let themes = builtin_themes();
        let mut ids: Vec<&str> = themes.iter().map(|t| t.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), themes.len());
    }

    #[test]
    fn test_only_neon_foundry_resets_cache() {
        let catalog = ThemeCatalog::new();
        assert!(catalog.get("neon-foundry").unwrap().resets_cache_on_beat());
        assert!(!catalog.get("cosmic-voyage").unwrap().resets_cache_on_beat());
        assert!(!catalog.get("digital-forest").unwrap().resets_cache_on_beat());
    }

    #[test]
    fn test_curves_are_monotonic_and_bounded() {
        for curve in [
            MappingCurve::Linear,
            MappingCurve::Exponential,
            MappingCurve::Logarithmic,
            MappingCurve::SCurve,
        ] {
            assert_eq!(curve.apply(0.0), 0.0);
            assert_eq!(curve.apply(1.0), 1.0);
            assert_eq!(curve.apply(-3.0), 0.0);
            assert_eq!(curve.apply(7.0), 1.0);
            assert!(curve.apply(0.4) <= curve.apply(0.6));
        }
    }

    #[test]
    fn test_custom_theme_is_deterministic() {
        let a = Theme::custom("  a glass city  ", ReactivityPreset::Energetic, BeatResponse::CacheReset);
        let b = Theme::custom("a glass city", ReactivityPreset::Energetic, BeatResponse::CacheReset);
        assert_eq!(a, b);
        assert_eq!(a.base_prompt, "a glass city");
        assert!(a.resets_cache_on_beat());
        a.validate().unwrap();
    }

    #[test]
    fn test_custom_presets_all_valid() {
        for preset in [
            ReactivityPreset::Subtle,
            ReactivityPreset::Balanced,
            ReactivityPreset::Energetic,
            ReactivityPreset::Chaotic,
        ] {
            for beat in [BeatResponse::None, BeatResponse::Pulse, BeatResponse::CacheReset] {
                Theme::custom("prompt", preset, beat).validate().unwrap();
            }
        }
        assert!(Theme::custom("p", ReactivityPreset::Subtle, BeatResponse::None)
            .beat
            .is_none());
    }

    #[test]
    fn test_validate_rejects_ascending_steps() {
        let mut theme = builtin_themes().remove(0);
        theme.ranges.denoising_steps.min = vec![200, 400];
        assert!(matches!(theme.validate(), Err(ThemeError::Invalid { .. })));
    }

    #[test]
    fn test_load_theme_file() {
        let toml_text = r#"
            [[theme]]
            id = "glitch-garden"
            name = "Glitch Garden"
            base_prompt = "a glitching flower garden"
            noise_curve = "s_curve"

            [theme.ranges]
            noise_scale = { min = 0.5, max = 0.9 }
            denoising_steps = { min = [800, 500], max = [1000, 700] }

            [theme.beat]
            action = "cache_reset"

            [[theme.variations]]
            trigger = { when = "energy_above", threshold = 0.8 }
            text = "pixel storms"
        "#;

        let mut catalog = ThemeCatalog::new();
        let before = catalog.themes().len();
        assert_eq!(catalog.load_str(toml_text).unwrap(), 1);
        assert_eq!(catalog.themes().len(), before + 1);

        let theme = catalog.require("glitch-garden").unwrap();
        assert_eq!(theme.ranges.low_energy_threshold, 0.3);
        assert_eq!(theme.noise_curve, MappingCurve::SCurve);
        assert!(theme.resets_cache_on_beat());
        assert_eq!(theme.variations[0].weight, 1.0);
    }

    #[test]
    fn test_require_unknown_theme() {
        let catalog = ThemeCatalog::new();
        assert!(matches!(
            catalog.require("nope"),
            Err(ThemeError::NotFound(_))
        ));
    }
}

//! MetaDJ Scope Core - audio analysis and parameter mapping
//!
//! This crate contains everything that runs without a network:
//! - Audio sources and the real-time analyzer (features, beat, derived metrics)
//! - Soundscape themes and the theme catalog
//! - The mapping engine from analysis ticks to generation parameters
//! - The `ScopeParameters` control-channel message
//! - Logging configuration

pub mod audio;
pub mod logging;
pub mod mapping;
pub mod parameters;
pub mod theme;

// --- Re-exports grouped by category ---

// Audio
pub use audio::{
    AnalysisError, AnalysisState, AnalyzerConfig, AudioAnalyzer, AudioFeatures, AudioSource,
    BeatConfig, BeatInfo, BufferSource, DerivedMetrics, LiveAnalyzer, NormalizationConfig,
    WavFileSource,
};

#[cfg(feature = "audio")]
pub use audio::CpalInputSource;

// Mapping & Themes
pub use mapping::compute_parameters;
pub use theme::{
    builtin_themes, BeatAction, BeatMapping, BeatResponse, MappingCurve, ReactivityPreset, Theme,
    ThemeCatalog, ThemeError,
};

// Parameters
pub use parameters::{PromptEntry, ScopeParameters, VaceSettings};

// Logging
pub use logging::LogConfig;

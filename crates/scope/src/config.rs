//! Client configuration
//!
//! Loaded from `~/.metadj-scope/config.toml`; written with defaults on first run.

use anyhow::{bail, Context, Result};
use scope_control::{ConnectionConfig, ReconnectPolicy};
use scope_core::audio::AnalyzerConfig;
use scope_core::logging::LogConfig;
use scope_core::parameters::VaceSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Scope server location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub base_url: String,
    /// Per-request timeout for REST calls
    pub request_timeout_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSection {
    pub reconnect_on_stream_stop: bool,
    pub reconnect_on_data_channel_close: bool,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    /// Empty for a media-only session
    pub control_channel: String,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            reconnect_on_stream_stop: true,
            reconnect_on_data_channel_close: true,
            max_reconnect_attempts: 3,
            reconnect_base_delay_ms: 1000,
            control_channel: "parameters".to_string(),
        }
    }
}

impl ConnectionSection {
    pub fn to_connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            reconnect: ReconnectPolicy {
                on_stream_stop: self.reconnect_on_stream_stop,
                on_channel_close: self.reconnect_on_data_channel_close,
                max_attempts: self.max_reconnect_attempts,
                base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            },
            control_channel: Some(self.control_channel.trim())
                .filter(|label| !label.is_empty())
                .map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSection {
    pub fft_size: usize,
    pub overlap: f32,
    /// Input device; `None` uses the system default
    pub device: Option<String>,
}

impl Default for AudioSection {
    fn default() -> Self {
        let analyzer = AnalyzerConfig::default();
        Self {
            fft_size: analyzer.fft_size,
            overlap: analyzer.overlap,
            device: None,
        }
    }
}

impl AudioSection {
    pub fn to_analyzer_config(&self) -> AnalyzerConfig {
        AnalyzerConfig {
            fft_size: self.fft_size,
            overlap: self.overlap,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundscapeSection {
    pub theme: String,
    pub min_send_interval_ms: u64,
    /// Extra `[[theme]]` definitions merged over the built-ins
    pub themes_file: Option<PathBuf>,
    pub vace_ref_images: Vec<String>,
    pub vace_context_scale: f32,
}

impl Default for SoundscapeSection {
    fn default() -> Self {
        Self {
            theme: "cosmic-voyage".to_string(),
            min_send_interval_ms: 100,
            themes_file: None,
            vace_ref_images: Vec::new(),
            vace_context_scale: 1.0,
        }
    }
}

impl SoundscapeSection {
    pub fn min_send_interval(&self) -> Duration {
        Duration::from_millis(self.min_send_interval_ms)
    }

    pub fn vace(&self) -> Option<VaceSettings> {
        (!self.vace_ref_images.is_empty()).then(|| VaceSettings {
            ref_images: self.vace_ref_images.clone(),
            context_scale: self.vace_context_scale,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    pub server: ServerSection,
    pub connection: ConnectionSection,
    pub audio: AudioSection,
    pub soundscape: SoundscapeSection,
    pub logging: LogConfig,
}

impl ScopeConfig {
    /// `~/.metadj-scope/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".metadj-scope").join("config.toml"))
    }

    /// Load from `path`, writing defaults there first if it does not exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.server.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            bail!("server.base_url must start with http:// or https://, got {:?}", url);
        }
        if self.server.request_timeout_ms == 0 {
            bail!("server.request_timeout_ms must be positive");
        }
        if self.connection.reconnect_base_delay_ms == 0 {
            bail!("connection.reconnect_base_delay_ms must be positive");
        }
        if !self.audio.fft_size.is_power_of_two() || self.audio.fft_size < 256 {
            bail!(
                "audio.fft_size must be a power of two >= 256, got {}",
                self.audio.fft_size
            );
        }
        if !(0.0..1.0).contains(&self.audio.overlap) {
            bail!("audio.overlap must be in [0, 1), got {}", self.audio.overlap);
        }
        if self.soundscape.theme.trim().is_empty() {
            bail!("soundscape.theme must not be empty");
        }
        if !(self.soundscape.vace_context_scale >= 0.0 && self.soundscape.vace_context_scale <= 2.0) {
            bail!(
                "soundscape.vace_context_scale must be in [0, 2], got {}",
                self.soundscape.vace_context_scale
            );
        }
        Ok(())
    }
}

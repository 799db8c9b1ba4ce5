//! Generation parameters sent to the Scope server
//!
//! [`ScopeParameters`] serializes directly to the control-channel wire
//! message. Optional keys are omitted when unset.

use serde::{Deserialize, Serialize};

/// Weight given to prompts that do not override it
pub const DEFAULT_PROMPT_WEIGHT: f32 = 1.0;

/// One weighted prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptEntry {
    pub text: String,
    pub weight: f32,
}

impl PromptEntry {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            weight: DEFAULT_PROMPT_WEIGHT,
        }
    }

    pub fn weighted(text: impl Into<String>, weight: f32) -> Self {
        Self {
            text: text.into(),
            weight,
        }
    }
}

/// VACE identity-lock settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaceSettings {
    /// Reference image paths or URLs on the server
    pub ref_images: Vec<String>,
    /// Conditioning strength (0.0 - 2.0)
    pub context_scale: f32,
}

impl Default for VaceSettings {
    fn default() -> Self {
        Self {
            ref_images: Vec::new(),
            context_scale: 1.0,
        }
    }
}

/// Mapped output for one tick; the control-channel message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeParameters {
    pub prompts: Vec<PromptEntry>,
    pub noise_scale: f32,
    pub denoising_step_list: Vec<u32>,
    pub manage_cache: bool,
    pub paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_cache: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vace_ref_images: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vace_context_scale: Option<f32>,
}

impl Default for ScopeParameters {
    fn default() -> Self {
        Self {
            prompts: Vec::new(),
            noise_scale: 0.7,
            denoising_step_list: vec![1000, 750, 500, 250],
            manage_cache: true,
            paused: false,
            reset_cache: None,
            vace_ref_images: None,
            vace_context_scale: None,
        }
    }
}

impl ScopeParameters {
    /// `reset_cache` is a one-shot flag; absent means false
    pub fn reset_cache(&self) -> bool {
        self.reset_cache.unwrap_or(false)
    }

    pub fn vace(&self) -> Option<VaceSettings> {
        self.vace_ref_images.as_ref().map(|images| VaceSettings {
            ref_images: images.clone(),
            context_scale: self.vace_context_scale.unwrap_or(1.0),
        })
    }

    pub fn set_vace(&mut self, vace: Option<VaceSettings>) {
        match vace {
            Some(v) if !v.ref_images.is_empty() => {
                self.vace_ref_images = Some(v.ref_images);
                self.vace_context_scale = Some(v.context_scale);
            }
            _ => {
                self.vace_ref_images = None;
                self.vace_context_scale = None;
            }
        }
    }

    /// Same payload ignoring the one-shot reset flag
    pub fn same_settings(&self, other: &Self) -> bool {
        self.prompts == other.prompts
            && self.noise_scale == other.noise_scale
            && self.denoising_step_list == other.denoising_step_list
            && self.manage_cache == other.manage_cache
            && self.paused == other.paused
            && self.vace_ref_images == other.vace_ref_images
            && self.vace_context_scale == other.vace_context_scale
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

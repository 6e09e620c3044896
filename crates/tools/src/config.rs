//! Trainer configuration file
//!
//! ```toml
//! [timing]
//! wpm = 25
//! effective_wpm = 15
//!
//! [noise]
//! volume = 0.2
//! atmospheric_intensity = 2.5
//!
//! [playback]
//! repeat_count = 2
//! mix_noise = true
//! ```

use anyhow::{Context, Result};
use cwtrain_audio::player::PlaybackRequest;
use cwtrain_core::noise::NoiseSettings;
use cwtrain_morse::cw::TimingSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Lesson playback options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub repeat_count: u32,
    /// Mix band noise under lesson tones
    pub mix_noise: bool,
    /// Samples per background noise buffer
    pub chunk_size: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            repeat_count: 1,
            mix_noise: false,
            chunk_size: 1024,
        }
    }
}

/// Everything the trainer reads from its settings file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub timing: TimingSettings,
    pub noise: NoiseSettings,
    pub playback: PlaybackConfig,
}

impl TrainerConfig {
    /// Load from TOML, falling back to JSON.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        match toml::from_str(content) {
            Ok(config) => Ok(config),
            Err(toml_err) => serde_json::from_str(content)
                .with_context(|| format!("Config is neither TOML ({}) nor JSON", toml_err)),
        }
    }

    /// Save as JSON when the extension says so, TOML otherwise.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        } else {
            toml::to_string_pretty(self).context("Failed to serialize config")?
        };
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;
        Ok(())
    }

    /// Copy with timing and noise forced into their safe ranges
    pub fn clamped(&self) -> Self {
        Self {
            timing: self.timing.clamped(),
            noise: self.noise.clamped(),
            playback: PlaybackConfig {
                repeat_count: self.playback.repeat_count.max(1),
                chunk_size: self.playback.chunk_size.max(1),
                ..self.playback.clone()
            },
        }
    }

    /// Build a lesson request for `text`.
    pub fn request(&self, text: &str) -> PlaybackRequest {
        let request = PlaybackRequest::new(text, self.timing).with_repeats(self.playback.repeat_count);
        if self.playback.mix_noise {
            request.with_noise(self.noise)
        } else {
            request
        }
    }
}

//! Persistent application settings.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use recital_core::{VoiceId, DEFAULT_MAX_CHUNK_CHARS};
use recital_engine::EngineConfig;
use recital_synth::{SynthConfig, DEFAULT_BASE_URL, DEFAULT_MODEL};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const CONFIG_FILE: &str = "config.json";

/// Settings loaded from `config.json`. Missing fields take defaults.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    /// Voice id or display name.
    pub voice: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub max_chunk_chars: usize,
    pub prefetch: bool,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    /// Output gain (0.0 to 1.0).
    pub volume: f32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            voice: "Kore".to_string(),
            sample_rate: 24_000,
            channels: 1,
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
            prefetch: true,
            request_timeout_secs: 30,
            max_retries: 3,
            // Slightly below max for headroom
            volume: 0.85,
        }
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &if self.api_key.is_empty() { "" } else { "<redacted>" })
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("voice", &self.voice)
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("max_chunk_chars", &self.max_chunk_chars)
            .field("prefetch", &self.prefetch)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("volume", &self.volume)
            .finish()
    }
}

impl AppConfig {
    /// Platform config location, e.g. `~/.config/recital/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "recital", "Recital").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Load from `path`, falling back to defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Write as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Replace the API key when `key` is present and non-blank.
    pub fn apply_api_key(&mut self, key: Option<String>) {
        if let Some(key) = key.filter(|k| !k.trim().is_empty()) {
            self.api_key = key;
        }
    }

    pub fn synth_config(&self) -> SynthConfig {
        SynthConfig {
            timeout_secs: self.request_timeout_secs,
            max_retries: self.max_retries,
            ..SynthConfig::new(self.api_key.clone())
        }
        .with_model(self.model.clone())
        .with_base_url(self.base_url.clone())
    }

    pub fn engine_config(&self, voice: VoiceId) -> EngineConfig {
        EngineConfig {
            voice,
            sample_rate: self.sample_rate,
            channels: self.channels,
            prefetch: self.prefetch,
        }
    }
}

//! Synthesis client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default REST base URL.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default speech model.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-preview-tts";

/// Settings for [`GeminiSynthesizer`](crate::GeminiSynthesizer).
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    /// API key sent as `x-goog-api-key`.
    pub api_key: String,
    /// Model name, e.g. `gemini-2.5-flash-preview-tts`.
    pub model: String,
    /// REST base URL without trailing slash.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Attempts per synthesis call, including the first.
    pub max_retries: u32,
}

impl SynthConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Full URL of the `generateContent` endpoint for the configured model.
    pub fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl std::fmt::Debug for SynthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthConfig")
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

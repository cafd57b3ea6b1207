//! Gemini text-to-speech client implementation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use recital_core::{Error, HttpError, Payload, Result, VoiceId};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use tracing::{debug, warn};

use crate::context::SynthConfig;
use crate::types::{GenerateResponse, SpeechRequest};
use crate::Synthesizer;

/// Base delay for exponential backoff (milliseconds).
const BASE_RETRY_DELAY_MS: u64 = 500;

/// Block period applied after the provider reports rate limiting.
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(30);

/// Gemini speech synthesis client.
#[derive(Clone)]
pub struct GeminiSynthesizer {
    /// HTTP client for making requests.
    http: reqwest::Client,
    config: SynthConfig,
    /// Rate limiter state.
    rate_limit_state: Arc<RwLock<RateLimitState>>,
}

#[derive(Debug, Default)]
struct RateLimitState {
    /// Time when we can make requests again (if rate limited).
    blocked_until: Option<Instant>,
}

impl RateLimitState {
    fn is_blocked(&self) -> bool {
        self.blocked_until.is_some_and(|until| Instant::now() < until)
    }

    fn block_for(&mut self, duration: Duration) {
        self.blocked_until = Some(Instant::now() + duration);
    }

    fn remaining_secs(&self) -> Option<u64> {
        self.blocked_until
            .map(|until| until.saturating_duration_since(Instant::now()).as_secs())
    }
}

impl GeminiSynthesizer {
    /// Create a new client.
    pub fn new(config: SynthConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(Error::Config("Missing API key for speech synthesis".to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut key = HeaderValue::from_str(&config.api_key)
            .map_err(|e| Error::Config(format!("API key is not a valid header value: {e}")))?;
        key.set_sensitive(true);
        headers.insert("x-goog-api-key", key);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            config,
            rate_limit_state: Arc::new(RwLock::new(RateLimitState::default())),
        })
    }

    /// The active configuration.
    pub const fn config(&self) -> &SynthConfig {
        &self.config
    }

    async fn synthesize_with_retries(&self, text: &str, voice: &VoiceId) -> Result<Payload> {
        {
            let state = self.rate_limit_state.read();
            if state.is_blocked() {
                return Err(Error::RateLimited {
                    retry_after_secs: state.remaining_secs(),
                });
            }
        }

        let body = serde_json::to_vec(&SpeechRequest::new(text, voice.as_str()))?;
        let attempts = self.config.max_retries.max(1);

        let mut last_error = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = Duration::from_millis(BASE_RETRY_DELAY_MS * 2u64.pow(attempt - 1));
                tokio::time::sleep(delay).await;
                debug!("Retry attempt {attempt} for voice {voice} after {delay:?}");
            }

            match self.do_request(&body).await {
                Ok(response_bytes) => {
                    let response: GenerateResponse = serde_json::from_slice(&response_bytes)
                        .map_err(|e| Error::Synthesis(format!("Failed to parse response: {e}")))?;
                    return response.into_payload();
                }
                Err(e) => {
                    warn!("Synthesis request failed (attempt {attempt}): {e}");

                    if e.is_rate_limited() {
                        let backoff = match &e {
                            Error::RateLimited {
                                retry_after_secs: Some(secs),
                            } => Duration::from_secs(*secs),
                            _ => RATE_LIMIT_BACKOFF,
                        };
                        self.rate_limit_state.write().block_for(backoff);
                        return Err(e);
                    }

                    // Don't retry non-retryable errors
                    if !e.is_retryable() {
                        return Err(e);
                    }

                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Network("Request failed".to_string())))
    }

    async fn do_request(&self, body: &[u8]) -> Result<Vec<u8>> {
        let response = self
            .http
            .post(self.config.endpoint())
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Http(HttpError::Timeout)
                } else if e.is_connect() {
                    Error::Http(HttpError::ConnectionFailed(e.to_string()))
                } else {
                    Error::Network(e.to_string())
                }
            })?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());

            return Err(Error::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Http(HttpError::StatusError {
                status: status.as_u16(),
                message,
            }));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| Error::Network(format!("Failed to read response body: {e}")))
    }
}

#[async_trait]
impl Synthesizer for GeminiSynthesizer {
    async fn synthesize(&self, text: &str, voice: &VoiceId) -> Result<Payload> {
        debug!("Synthesizing {} chars with voice {voice}", text.chars().count());
        self.synthesize_with_retries(text, voice)
            .await
            .map_err(|e| match e {
                // Everything that is not a decode problem is a provider failure
                kept @ (Error::AudioDecode(_) | Error::Synthesis(_)) => kept,
                other => Error::Synthesis(other.to_string()),
            })
    }
}

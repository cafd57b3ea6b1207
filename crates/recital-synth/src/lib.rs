//! # recital-synth
//!
//! Speech synthesis client for Recital.
//!
//! This crate turns `(text, voice)` into an encoded audio payload using the
//! Gemini text-to-speech REST endpoint.

pub mod client;
pub mod context;
pub mod types;

use async_trait::async_trait;
use recital_core::{Payload, Result, VoiceId};

pub use client::GeminiSynthesizer;
pub use context::{SynthConfig, DEFAULT_BASE_URL, DEFAULT_MODEL};

/// Produces encoded speech for a piece of text.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` with `voice`. Provider, network and quota failures
    /// surface as synthesis-class errors.
    async fn synthesize(&self, text: &str, voice: &VoiceId) -> Result<Payload>;
}

//! Encoded payloads and decoded audio buffers.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

/// Encoded audio returned by a synthesis provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Raw encoded bytes.
    pub data: Bytes,
    /// MIME type reported by the provider (e.g. `audio/L16;codec=pcm;rate=24000`).
    pub mime_type: String,
}

impl Payload {
    pub fn new(data: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    /// True if the payload is headerless linear PCM.
    pub fn is_raw_pcm(&self) -> bool {
        let mime = self.mime_type.to_ascii_lowercase();
        mime.starts_with("audio/l16") || mime.starts_with("audio/pcm") || mime.contains("codec=pcm")
    }

    /// Sample rate advertised in the MIME parameters, if any.
    pub fn advertised_rate(&self) -> Option<u32> {
        self.mime_type
            .split(';')
            .filter_map(|param| param.trim().split_once('='))
            .find(|(key, _)| key.eq_ignore_ascii_case("rate"))
            .and_then(|(_, value)| value.trim().parse().ok())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Decoded PCM audio, immutable once created.
///
/// Cloning shares the sample storage.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
}

impl AudioBuffer {
    /// Create a buffer from interleaved f32 samples.
    pub fn new(samples: impl Into<Arc<[f32]>>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            channels: channels.max(1),
        }
    }

    /// Interleaved samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels)
    }

    /// Playback length.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / f64::from(self.sample_rate))
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// True if both buffers share the same sample storage.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.samples, &other.samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_duration() {
        let buffer = AudioBuffer::new(vec![0.0; 48_000], 24_000, 2);
        assert_eq!(buffer.frames(), 24_000);
        assert_eq!(buffer.duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_clone_shares_samples() {
        let buffer = AudioBuffer::new(vec![0.5; 4], 24_000, 1);
        let copy = buffer.clone();
        assert!(buffer.ptr_eq(&copy));
    }

    #[test]
    fn test_payload_mime_parsing() {
        let payload = Payload::new(vec![0u8; 4], "audio/L16;codec=pcm;rate=24000");
        assert!(payload.is_raw_pcm());
        assert_eq!(payload.advertised_rate(), Some(24_000));

        let wav = Payload::new(vec![0u8; 4], "audio/wav");
        assert!(!wav.is_raw_pcm());
        assert_eq!(wav.advertised_rate(), None);
    }
}

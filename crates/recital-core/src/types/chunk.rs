//! Chunk and cache key types.

use serde::{Deserialize, Serialize};

use super::VoiceId;

/// One ordered text segment of the current reading sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position within the sequence (0-based).
    pub index: usize,
    /// Text to speak.
    pub text: String,
}

impl Chunk {
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
        }
    }

    /// Build an indexed sequence from split text segments.
    pub fn sequence<I, S>(segments: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        segments
            .into_iter()
            .enumerate()
            .map(|(index, text)| Self::new(index, text))
            .collect()
    }
}

/// Identity of synthesized audio: same voice and same position.
///
/// Not content-hashed; a new chunk sequence always clears the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub voice: VoiceId,
    pub index: usize,
}

impl CacheKey {
    pub const fn new(voice: VoiceId, index: usize) -> Self {
        Self { voice, index }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.voice, self.index)
    }
}

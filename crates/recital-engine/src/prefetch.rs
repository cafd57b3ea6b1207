//! Look-ahead synthesis of the chunk after the one sounding.

use recital_core::{CacheKey, Chunk, VoiceId};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::fetcher::ChunkFetcher;

/// Warms the cache for upcoming chunks. Never touches session state.
#[derive(Clone)]
pub struct Prefetcher {
    fetcher: ChunkFetcher,
    enabled: bool,
}

impl Prefetcher {
    pub const fn new(fetcher: ChunkFetcher, enabled: bool) -> Self {
        Self { fetcher, enabled }
    }

    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Start a detached resolution of `chunk` for `voice`.
    ///
    /// Returns `None` when disabled or when the chunk is already cached.
    /// Failures are logged and otherwise ignored.
    pub fn schedule(&self, voice: &VoiceId, chunk: &Chunk) -> Option<JoinHandle<()>> {
        if !self.enabled {
            return None;
        }
        let key = CacheKey::new(voice.clone(), chunk.index);
        if self.fetcher.cache().contains(&key) {
            debug!("Prefetch skipped, {key} already cached");
            return None;
        }

        debug!("Prefetching {key}");
        // Pinned now; the task may not run until after the next clear
        let epoch = self.fetcher.cache().epoch();
        let fetcher = self.fetcher.clone();
        let voice = voice.clone();
        let index = chunk.index;
        let text = chunk.text.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = fetcher.resolve_at(epoch, &voice, index, &text).await {
                warn!("Prefetch of chunk {index} ({voice}) failed: {e}");
            }
        }))
    }
}

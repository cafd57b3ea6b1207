//! Cache-first resolution of a chunk's audio.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use recital_audio::PayloadDecoder;
use recital_core::{AudioBuffer, CacheKey, Result, VoiceId};
use recital_synth::Synthesizer;
use tokio::sync::OnceCell;
use tracing::{debug, trace};

use crate::cache::AudioCache;

type InflightKey = (u64, CacheKey);

/// Resolves "chunk N for voice V" into a decoded buffer.
///
/// Resolutions are never cancelled. A caller that loses interest simply
/// ignores the result; the buffer still lands in the cache unless the cache
/// was cleared in the meantime.
#[derive(Clone)]
pub struct ChunkFetcher {
    cache: AudioCache,
    synthesizer: Arc<dyn Synthesizer>,
    decoder: Arc<dyn PayloadDecoder>,
    sample_rate: u32,
    channels: u16,
    /// Resolutions currently talking to the provider, per cache epoch.
    inflight: Arc<Mutex<HashMap<InflightKey, Arc<OnceCell<AudioBuffer>>>>>,
}

impl ChunkFetcher {
    pub fn new(
        cache: AudioCache,
        synthesizer: Arc<dyn Synthesizer>,
        decoder: Arc<dyn PayloadDecoder>,
        sample_rate: u32,
        channels: u16,
    ) -> Self {
        Self {
            cache,
            synthesizer,
            decoder,
            sample_rate,
            channels,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub const fn cache(&self) -> &AudioCache {
        &self.cache
    }

    /// Resolve the buffer for `(voice, index)` against the current cache.
    pub async fn resolve(&self, voice: &VoiceId, index: usize, text: &str) -> Result<AudioBuffer> {
        self.resolve_at(self.cache.epoch(), voice, index, text).await
    }

    /// Resolve the buffer for `(voice, index)`, synthesizing `text` on a miss.
    ///
    /// `epoch` is the cache epoch the caller saw when it decided to load.
    /// Concurrent resolutions of the same key and epoch share one provider
    /// call. Once the cache has moved past `epoch`, the key may name a
    /// different text, so the cache is neither read nor written and the
    /// call is not shared.
    pub async fn resolve_at(
        &self,
        epoch: u64,
        voice: &VoiceId,
        index: usize,
        text: &str,
    ) -> Result<AudioBuffer> {
        let key = CacheKey::new(voice.clone(), index);
        if epoch != self.cache.epoch() {
            debug!("Resolving {key} from superseded epoch {epoch} without the cache");
            return self.synthesize_and_decode(voice, index, text).await;
        }
        if let Some(buffer) = self.cache.get(&key) {
            trace!("Cache hit for {key}");
            return Ok(buffer);
        }

        let inflight_key = (epoch, key.clone());
        let cell = self
            .inflight
            .lock()
            .entry(inflight_key.clone())
            .or_default()
            .clone();

        let result = cell
            .get_or_try_init(|| self.synthesize_and_decode(voice, index, text))
            .await
            .cloned();

        if let Ok(buffer) = &result {
            self.cache.put_if_current(epoch, key, buffer.clone());
        }

        let mut inflight = self.inflight.lock();
        if inflight
            .get(&inflight_key)
            .is_some_and(|current| Arc::ptr_eq(current, &cell))
        {
            inflight.remove(&inflight_key);
        }
        drop(inflight);

        result
    }

    async fn synthesize_and_decode(&self, voice: &VoiceId, index: usize, text: &str) -> Result<AudioBuffer> {
        debug!("Cache miss for chunk {index} ({voice}), synthesizing");
        let payload = self.synthesizer.synthesize(text, voice).await?;
        trace!("Chunk {index}: {} payload bytes ({})", payload.len(), payload.mime_type);

        let buffer = self
            .decoder
            .decode(payload, self.sample_rate, self.channels)
            .await?;
        debug!(
            "Chunk {index} decoded: {:.2}s at {} Hz",
            buffer.duration().as_secs_f64(),
            buffer.sample_rate()
        );
        Ok(buffer)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::{buffer_text, FakeDecoder, FakeSynth};
    use recital_core::ErrorKind;

    fn fetcher(synth: &Arc<FakeSynth>) -> ChunkFetcher {
        ChunkFetcher::new(
            AudioCache::new(),
            synth.clone(),
            Arc::new(FakeDecoder),
            24_000,
            1,
        )
    }

    #[tokio::test]
    async fn test_second_resolve_is_cache_hit() {
        let synth = Arc::new(FakeSynth::new());
        let fetcher = fetcher(&synth);
        let voice = VoiceId::new("Kore");

        let first = fetcher.resolve(&voice, 0, "Hello.").await.unwrap();
        let second = fetcher.resolve(&voice, 0, "Hello.").await.unwrap();

        assert_eq!(synth.call_count(), 1);
        assert!(first.ptr_eq(&second));
        assert_eq!(buffer_text(&second), "Hello.");
    }

    #[tokio::test]
    async fn test_voice_partitions_cache() {
        let synth = Arc::new(FakeSynth::new());
        let fetcher = fetcher(&synth);

        fetcher.resolve(&VoiceId::new("Kore"), 0, "Hi.").await.unwrap();
        fetcher.resolve(&VoiceId::new("Puck"), 0, "Hi.").await.unwrap();

        assert_eq!(synth.call_count(), 2);
        assert_eq!(fetcher.cache().len(), 2);
    }

    #[tokio::test]
    async fn test_synthesis_failure_is_not_cached() {
        let synth = Arc::new(FakeSynth::new());
        synth.fail_text("Boom.");
        let fetcher = fetcher(&synth);
        let voice = VoiceId::new("Kore");

        let err = fetcher.resolve(&voice, 0, "Boom.").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Synthesis);
        assert!(fetcher.cache().is_empty());

        synth.heal_text("Boom.");
        fetcher.resolve(&voice, 0, "Boom.").await.unwrap();
        assert_eq!(synth.call_count(), 2);
    }

    #[tokio::test]
    async fn test_decode_failure_surfaces_as_decode_error() {
        let synth = Arc::new(FakeSynth::new());
        synth.corrupt_text("Garbled.");
        let fetcher = fetcher(&synth);

        let err = fetcher
            .resolve(&VoiceId::new("Kore"), 0, "Garbled.")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[tokio::test]
    async fn test_concurrent_resolutions_share_one_call() {
        let synth = Arc::new(FakeSynth::new());
        let gate = synth.gate("Slow.", "Kore");
        let fetcher = fetcher(&synth);
        let voice = VoiceId::new("Kore");

        let a = tokio::spawn({
            let fetcher = fetcher.clone();
            let voice = voice.clone();
            async move { fetcher.resolve(&voice, 0, "Slow.").await }
        });
        let b = tokio::spawn({
            let fetcher = fetcher.clone();
            let voice = voice.clone();
            async move { fetcher.resolve(&voice, 0, "Slow.").await }
        });

        while synth.call_count() == 0 {
            tokio::task::yield_now().await;
        }
        tokio::task::yield_now().await;
        gate.notify_one();

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        assert!(a.ptr_eq(&b));
        assert_eq!(synth.call_count(), 1);
    }

    #[tokio::test]
    async fn test_result_after_clear_is_not_cached() {
        let synth = Arc::new(FakeSynth::new());
        let gate = synth.gate("Late.", "Kore");
        let fetcher = fetcher(&synth);

        let pending = tokio::spawn({
            let fetcher = fetcher.clone();
            async move { fetcher.resolve(&VoiceId::new("Kore"), 4, "Late.").await }
        });

        while synth.call_count() == 0 {
            tokio::task::yield_now().await;
        }
        fetcher.cache().clear();
        gate.notify_one();

        // The caller still gets its buffer, but the fresh cache stays empty
        assert!(pending.await.unwrap().is_ok());
        assert!(fetcher.cache().is_empty());
    }

    #[tokio::test]
    async fn test_superseded_epoch_bypasses_cache() {
        let synth = Arc::new(FakeSynth::new());
        let fetcher = fetcher(&synth);
        let voice = VoiceId::new("Kore");

        let old_epoch = fetcher.cache().epoch();
        fetcher.cache().clear();
        let current = fetcher.resolve(&voice, 0, "New.").await.unwrap();

        // Same key, old text: must not see the new buffer nor replace it
        let old = fetcher.resolve_at(old_epoch, &voice, 0, "Old.").await.unwrap();
        assert_eq!(buffer_text(&old), "Old.");
        assert!(fetcher.cache().get(&CacheKey::new(voice, 0)).unwrap().ptr_eq(&current));
        assert_eq!(fetcher.cache().len(), 1);
        assert_eq!(synth.call_count(), 2);
    }
}

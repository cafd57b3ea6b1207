//! In-memory audio cache keyed by voice and chunk position.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use recital_core::{AudioBuffer, CacheKey};
use tracing::{debug, trace};

#[derive(Default)]
struct Inner {
    entries: HashMap<CacheKey, AudioBuffer>,
    /// Bumped on every clear.
    epoch: u64,
}

/// Shared key-to-buffer store.
///
/// Entries are never overwritten; a key keeps its first buffer until the
/// next [`clear`](Self::clear).
#[derive(Clone, Default)]
pub struct AudioCache {
    inner: Arc<RwLock<Inner>>,
}

impl AudioCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<AudioBuffer> {
        self.inner.read().entries.get(key).cloned()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.read().entries.contains_key(key)
    }

    /// Insert `buffer` unless the key is already present.
    /// Returns true if the buffer was stored.
    pub fn put(&self, key: CacheKey, buffer: AudioBuffer) -> bool {
        let mut inner = self.inner.write();
        Self::insert(&mut inner, key, buffer)
    }

    /// Like [`put`](Self::put), but only if no clear happened since `epoch`.
    pub fn put_if_current(&self, epoch: u64, key: CacheKey, buffer: AudioBuffer) -> bool {
        let mut inner = self.inner.write();
        if inner.epoch != epoch {
            debug!("Dropping {key} from epoch {epoch}; cache is at {}", inner.epoch);
            return false;
        }
        Self::insert(&mut inner, key, buffer)
    }

    fn insert(inner: &mut Inner, key: CacheKey, buffer: AudioBuffer) -> bool {
        if inner.entries.contains_key(&key) {
            trace!("Keeping existing entry for {key}");
            return false;
        }
        trace!("Cached {key}");
        inner.entries.insert(key, buffer);
        true
    }

    /// Drop every entry and start a new epoch.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        let dropped = inner.entries.len();
        inner.entries.clear();
        inner.epoch += 1;
        debug!("Audio cache cleared ({dropped} entries), epoch {}", inner.epoch);
    }

    /// Current epoch; changes on every clear.
    pub fn epoch(&self) -> u64 {
        self.inner.read().epoch
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use recital_core::VoiceId;

    fn key(voice: &str, index: usize) -> CacheKey {
        CacheKey::new(VoiceId::new(voice), index)
    }

    fn buffer(value: f32) -> AudioBuffer {
        AudioBuffer::new(vec![value; 4], 24_000, 1)
    }

    #[test]
    fn test_get_put() {
        let cache = AudioCache::new();
        assert!(cache.get(&key("Kore", 0)).is_none());

        assert!(cache.put(key("Kore", 0), buffer(0.1)));
        assert_eq!(cache.get(&key("Kore", 0)).unwrap(), buffer(0.1));
        assert!(cache.get(&key("Puck", 0)).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_put_keeps_first_entry() {
        let cache = AudioCache::new();
        cache.put(key("Kore", 0), buffer(0.1));
        assert!(!cache.put(key("Kore", 0), buffer(0.9)));
        assert_eq!(cache.get(&key("Kore", 0)).unwrap(), buffer(0.1));
    }

    #[test]
    fn test_clear_bumps_epoch_and_rejects_stale_writes() {
        let cache = AudioCache::new();
        let before = cache.epoch();
        cache.put(key("Kore", 0), buffer(0.1));

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.epoch(), before + 1);

        assert!(!cache.put_if_current(before, key("Kore", 1), buffer(0.2)));
        assert!(cache.is_empty());
        assert!(cache.put_if_current(before + 1, key("Kore", 1), buffer(0.2)));
    }

    #[test]
    fn test_clones_share_storage() {
        let cache = AudioCache::new();
        let other = cache.clone();
        other.put(key("Kore", 3), buffer(0.3));
        assert!(cache.contains(&key("Kore", 3)));
    }

    #[test]
    fn test_concurrent_writes_to_different_keys() {
        let cache = AudioCache::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    cache.put(key("Kore", i), buffer(0.0));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 8);
    }
}

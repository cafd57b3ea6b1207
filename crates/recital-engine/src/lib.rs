//! # recital-engine
//!
//! Chunked playback engine for Recital.
//!
//! Features:
//! - Voice and position keyed audio cache with epoch-guarded writes
//! - Coalesced cache-first chunk resolution
//! - Single-task state machine with stale-result rejection
//! - Look-ahead prefetch of the next chunk

pub mod cache;
pub mod engine;
pub mod fetcher;
pub mod prefetch;
pub mod sequencer;

#[cfg(test)]
mod testing;

pub use cache::AudioCache;
pub use engine::{
    EngineCommand, EngineConfig, EngineEvent, EngineParts, ReaderEngine, EVENT_QUEUE_CAPACITY,
};
pub use fetcher::ChunkFetcher;
pub use prefetch::Prefetcher;
pub use sequencer::{Message, Sequencer, Ticket};

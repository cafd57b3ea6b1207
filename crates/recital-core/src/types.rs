//! Core domain types for Recital.

pub mod buffer;
pub mod chunk;
pub mod session;
pub mod voice;

pub use buffer::{AudioBuffer, Payload};
pub use chunk::{CacheKey, Chunk};
pub use session::{Mode, Phase, SessionSnapshot, SessionState};
pub use voice::{Gender, Voice, VoiceCatalog, VoiceId};

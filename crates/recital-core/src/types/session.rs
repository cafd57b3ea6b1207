//! Session state for the single playback surface.

use serde::{Deserialize, Serialize};

use super::Chunk;
use crate::error::ErrorInfo;

/// Whether the text is being edited or read aloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Editing,
    Reading,
}

/// Externally visible phase of the playback state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Editing; no chunk playback.
    #[default]
    Idle,
    /// Reading, not playing, nothing in flight.
    Ready,
    /// Reading, playing, fetch in flight for the active chunk.
    Loading,
    /// Reading, playing, the active chunk is audible.
    Sounding,
    /// Reading, halted by an error.
    Error,
}

/// Authoritative session state, owned by the sequencer.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub mode: Mode,
    /// Valid only while reading.
    pub chunks: Vec<Chunk>,
    /// `None` when there are no chunks.
    pub active_index: Option<usize>,
    /// Whether audio should be advancing right now.
    pub playing: bool,
    /// A fetch for the active index is outstanding and still relevant.
    pub loading: bool,
    pub last_error: Option<ErrorInfo>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the state-machine phase from the flags.
    pub const fn phase(&self) -> Phase {
        match self.mode {
            Mode::Editing => Phase::Idle,
            Mode::Reading => {
                if self.playing {
                    if self.loading {
                        Phase::Loading
                    } else {
                        Phase::Sounding
                    }
                } else if self.last_error.is_some() {
                    Phase::Error
                } else {
                    Phase::Ready
                }
            }
        }
    }

    /// The chunk at the active index.
    pub fn active_chunk(&self) -> Option<&Chunk> {
        self.active_index.and_then(|i| self.chunks.get(i))
    }

    /// Whether `index` addresses a chunk of the current sequence.
    pub fn in_range(&self, index: usize) -> bool {
        index < self.chunks.len()
    }

    /// Whether `playing` implies a valid reading position.
    pub fn is_consistent(&self) -> bool {
        if !self.playing {
            return true;
        }
        self.mode == Mode::Reading
            && !self.chunks.is_empty()
            && self.active_index.is_some_and(|i| self.in_range(i))
    }

    /// Project the observable part of the state.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            mode: self.mode,
            phase: self.phase(),
            active_index: self.active_index,
            chunk_count: self.chunks.len(),
            playing: self.playing,
            loading: self.loading,
            last_error: self.last_error.clone(),
        }
    }
}

/// Observable state emitted on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub mode: Mode,
    pub phase: Phase,
    pub active_index: Option<usize>,
    pub chunk_count: usize,
    pub playing: bool,
    pub loading: bool,
    pub last_error: Option<ErrorInfo>,
}

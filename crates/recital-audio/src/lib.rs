//! # recital-audio
//!
//! Audio plumbing for Recital.
//!
//! Features:
//! - Headerless PCM and symphonia container decoding
//! - rubato resampling to the device rate
//! - Single-source cpal playback driver with end-of-source notification

pub mod decode;
pub mod output;
pub mod resample;

pub use decode::{PayloadDecoder, PcmDecoder};
pub use output::{CpalDriver, EndedCallback, PlaybackDriver, SourceSlot};

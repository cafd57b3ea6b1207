//! # recital-core
//!
//! Core types, traits, and error handling for the Recital text reader.

pub mod error;
pub mod text;
pub mod types;

pub use error::{Error, ErrorInfo, ErrorKind, HttpError, Result};
pub use text::{SentenceSplitter, Splitter, DEFAULT_MAX_CHUNK_CHARS};
pub use types::*;

//! Reader engine handle: commands in, snapshots and events out.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver};
use parking_lot::{Mutex, RwLock};
use recital_audio::{PayloadDecoder, PlaybackDriver};
use recital_core::{Error, ErrorInfo, Result, SessionSnapshot, Splitter, VoiceId};
use recital_synth::Synthesizer;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::AudioCache;
use crate::fetcher::ChunkFetcher;
use crate::sequencer::{Message, Sequencer};

/// Events held for a slow or absent listener before new ones are dropped.
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Commands accepted by the reader engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    /// Split the text and start reading it from the first chunk.
    StartReading(String),
    /// Pause if playing, otherwise (re)start the active chunk.
    TogglePlayPause,
    /// Move to the following chunk.
    Next,
    /// Move to the preceding chunk.
    Prev,
    /// Jump to a chunk by index.
    Seek(usize),
    /// Switch voice. Stops playback and drops all cached audio.
    ChangeVoice(VoiceId),
    /// Leave reading mode.
    ExitToEditing,
    /// Release the output and stop the engine.
    Shutdown,
}

/// Events emitted by the reader engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Observable state changed.
    StateChanged(SessionSnapshot),
    /// A chunk became audible.
    ChunkStarted { index: usize },
    /// The last chunk finished.
    Finished,
    /// Playback halted or input was rejected.
    Error(ErrorInfo),
}

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Voice used for synthesis until changed.
    pub voice: VoiceId,
    /// Rate buffers are decoded to.
    pub sample_rate: u32,
    pub channels: u16,
    /// Synthesize the next chunk while the current one sounds.
    pub prefetch: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            voice: VoiceId::new("Kore"),
            sample_rate: 24_000,
            channels: 1,
            prefetch: true,
        }
    }
}

/// Collaborators the engine is assembled from.
pub struct EngineParts {
    pub synthesizer: Arc<dyn Synthesizer>,
    pub decoder: Arc<dyn PayloadDecoder>,
    pub driver: Box<dyn PlaybackDriver>,
    pub splitter: Arc<dyn Splitter>,
}

/// Handle to a running reader engine.
///
/// The session lives on a tokio task; this handle only sends commands and
/// reads what the task publishes.
pub struct ReaderEngine {
    /// Command sender.
    command_tx: UnboundedSender<Message>,
    /// Event receiver.
    event_rx: Receiver<EngineEvent>,
    /// Last published state.
    snapshot: Arc<RwLock<SessionSnapshot>>,
    cache: AudioCache,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReaderEngine {
    /// Start the engine on the current tokio runtime.
    pub fn spawn(config: &EngineConfig, parts: EngineParts) -> Self {
        let (command_tx, command_rx) = unbounded_channel();
        let (event_tx, event_rx) = bounded(EVENT_QUEUE_CAPACITY);

        let cache = AudioCache::new();
        let fetcher = ChunkFetcher::new(
            cache.clone(),
            parts.synthesizer,
            parts.decoder,
            config.sample_rate,
            config.channels,
        );
        let sequencer = Sequencer::new(
            config,
            fetcher,
            parts.driver,
            parts.splitter,
            command_tx.clone(),
            event_tx,
        );
        let snapshot = sequencer.published();

        info!(
            "Reader engine starting: voice {}, {} Hz, prefetch {}",
            config.voice, config.sample_rate, config.prefetch
        );
        let task = tokio::spawn(run(sequencer, command_rx));

        Self {
            command_tx,
            event_rx,
            snapshot,
            cache,
            task: Mutex::new(Some(task)),
        }
    }

    /// Get the current session snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.read().clone()
    }

    /// Number of buffers held in the audio cache.
    pub fn cached_chunks(&self) -> usize {
        self.cache.len()
    }

    /// Send a command to the engine.
    pub fn send_command(&self, command: EngineCommand) -> Result<()> {
        self.command_tx
            .send(Message::Command(command))
            .map_err(|_| Error::Internal("Reader engine is not running".to_string()))
    }

    pub fn start_reading(&self, text: impl Into<String>) -> Result<()> {
        self.send_command(EngineCommand::StartReading(text.into()))
    }

    pub fn toggle_play_pause(&self) -> Result<()> {
        self.send_command(EngineCommand::TogglePlayPause)
    }

    pub fn next(&self) -> Result<()> {
        self.send_command(EngineCommand::Next)
    }

    pub fn prev(&self) -> Result<()> {
        self.send_command(EngineCommand::Prev)
    }

    pub fn seek(&self, index: usize) -> Result<()> {
        self.send_command(EngineCommand::Seek(index))
    }

    pub fn change_voice(&self, voice: VoiceId) -> Result<()> {
        self.send_command(EngineCommand::ChangeVoice(voice))
    }

    pub fn exit_to_editing(&self) -> Result<()> {
        self.send_command(EngineCommand::ExitToEditing)
    }

    /// Try to receive an event without blocking.
    pub fn try_recv_event(&self) -> Option<EngineEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Receive events, blocking until one is available.
    pub fn recv_event(&self) -> Option<EngineEvent> {
        self.event_rx.recv().ok()
    }

    /// Receive an event, giving up after `timeout`.
    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<EngineEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    /// A receiver sharing this engine's event queue.
    pub fn events(&self) -> Receiver<EngineEvent> {
        self.event_rx.clone()
    }

    /// Stop the engine and wait for its task to finish.
    pub async fn shutdown(&self) -> Result<()> {
        // Already stopped if the send fails
        let _ = self.send_command(EngineCommand::Shutdown);
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.await
                .map_err(|e| Error::Internal(format!("Reader engine task failed: {e}")))?;
        }
        Ok(())
    }
}

impl Drop for ReaderEngine {
    fn drop(&mut self) {
        if self.task.lock().is_some() {
            let _ = self.send_command(EngineCommand::Shutdown);
        }
    }
}

async fn run(mut sequencer: Sequencer, mut inbox: UnboundedReceiver<Message>) {
    info!("Reader engine started");
    while let Some(message) = inbox.recv().await {
        if !sequencer.handle(message) {
            debug!("Shutdown requested");
            break;
        }
    }
    info!("Reader engine stopped");
}

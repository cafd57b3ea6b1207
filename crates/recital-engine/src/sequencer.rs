//! Playback state machine.
//!
//! The sequencer owns the session state and is only ever driven from one
//! task. User commands, fetch completions and end-of-source notifications
//! all arrive as [`Message`]s on the same inbox, so transitions never
//! interleave. Async work is spawned off and reports back through the inbox
//! tagged with a [`Ticket`]; a result whose ticket no longer matches the
//! session is dropped.

use std::sync::Arc;

use crossbeam_channel::{Sender, TrySendError};
use parking_lot::RwLock;
use recital_audio::{EndedCallback, PlaybackDriver};
use recital_core::{
    AudioBuffer, Chunk, Error, Mode, Result, SessionSnapshot, SessionState, Splitter, VoiceId,
};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, trace, warn};

use crate::engine::{EngineCommand, EngineConfig, EngineEvent};
use crate::fetcher::ChunkFetcher;
use crate::prefetch::Prefetcher;

/// Identifies one attempt at loading and sounding a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub voice: VoiceId,
    pub index: usize,
    /// Incremented on every entry into loading.
    pub cycle: u64,
    /// Cache epoch when the load was issued.
    pub epoch: u64,
}

/// Everything the sequencer reacts to.
#[derive(Debug)]
pub enum Message {
    Command(EngineCommand),
    FetchSettled {
        ticket: Ticket,
        result: Result<AudioBuffer>,
    },
    Ended(Ticket),
}

pub struct Sequencer {
    state: SessionState,
    voice: VoiceId,
    cycle: u64,
    /// Ticket of the source the driver is sounding, if any.
    sounding: Option<Ticket>,
    fetcher: ChunkFetcher,
    prefetcher: Prefetcher,
    driver: Box<dyn PlaybackDriver>,
    splitter: Arc<dyn Splitter>,
    inbox: UnboundedSender<Message>,
    events: Sender<EngineEvent>,
    published: Arc<RwLock<SessionSnapshot>>,
}

impl Sequencer {
    pub fn new(
        config: &EngineConfig,
        fetcher: ChunkFetcher,
        driver: Box<dyn PlaybackDriver>,
        splitter: Arc<dyn Splitter>,
        inbox: UnboundedSender<Message>,
        events: Sender<EngineEvent>,
    ) -> Self {
        let state = SessionState::new();
        let published = Arc::new(RwLock::new(state.snapshot()));

        Self {
            state,
            voice: config.voice.clone(),
            cycle: 0,
            sounding: None,
            prefetcher: Prefetcher::new(fetcher.clone(), config.prefetch),
            fetcher,
            driver,
            splitter,
            inbox,
            events,
            published,
        }
    }

    /// Last published snapshot, shared with readers on other threads.
    pub fn published(&self) -> Arc<RwLock<SessionSnapshot>> {
        self.published.clone()
    }

    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    pub const fn voice(&self) -> &VoiceId {
        &self.voice
    }

    /// Apply one message and publish the resulting state.
    ///
    /// Returns false once the engine has been shut down.
    pub fn handle(&mut self, message: Message) -> bool {
        let keep_running = match message {
            Message::Command(command) => {
                let shutdown = matches!(command, EngineCommand::Shutdown);
                self.dispatch(command);
                !shutdown
            }
            Message::FetchSettled { ticket, result } => {
                self.on_fetch_settled(ticket, result);
                true
            }
            Message::Ended(ticket) => {
                self.on_ended(&ticket);
                true
            }
        };
        self.publish();
        keep_running
    }

    fn dispatch(&mut self, command: EngineCommand) {
        self.state.last_error = None;
        match command {
            EngineCommand::StartReading(text) => self.start_reading(&text),
            EngineCommand::TogglePlayPause => self.toggle_play_pause(),
            EngineCommand::Next => self.next(),
            EngineCommand::Prev => self.prev(),
            EngineCommand::Seek(index) => self.seek(index),
            EngineCommand::ChangeVoice(voice) => self.change_voice(voice),
            EngineCommand::ExitToEditing => self.exit_to_editing(),
            EngineCommand::Shutdown => self.shutdown(),
        }
    }

    fn start_reading(&mut self, text: &str) {
        let segments = self.splitter.split(text);
        if segments.is_empty() {
            warn!("Nothing to read in {} chars of input", text.chars().count());
            self.fail_soft(&Error::EmptyInput);
            return;
        }

        self.stop_source();
        self.fetcher.cache().clear();
        self.state.chunks = Chunk::sequence(segments);
        self.state.mode = Mode::Reading;
        self.state.active_index = Some(0);
        info!(
            "Reading {} chunks with voice {}",
            self.state.chunks.len(),
            self.voice
        );
        self.begin_loading();
    }

    fn toggle_play_pause(&mut self) {
        if self.state.mode != Mode::Reading {
            debug!("Play/pause ignored while editing");
            return;
        }
        if self.state.playing {
            self.stop_source();
            self.state.playing = false;
            self.state.loading = false;
            info!("Paused at chunk {:?}", self.state.active_index);
        } else {
            self.begin_loading();
        }
    }

    fn next(&mut self) {
        if let Some(index) = self.state.active_index {
            self.jump(index + 1);
        }
    }

    fn prev(&mut self) {
        if let Some(index) = self.state.active_index.and_then(|i| i.checked_sub(1)) {
            self.jump(index);
        }
    }

    fn seek(&mut self, index: usize) {
        self.jump(index);
    }

    /// Move to `index` and start playing it. Out-of-range targets are ignored.
    fn jump(&mut self, index: usize) {
        if self.state.mode != Mode::Reading || !self.state.in_range(index) {
            debug!(
                "No chunk {index} to move to ({} chunks)",
                self.state.chunks.len()
            );
            return;
        }
        self.stop_source();
        self.state.active_index = Some(index);
        self.begin_loading();
    }

    fn change_voice(&mut self, voice: VoiceId) {
        info!("Voice {} -> {voice}", self.voice);
        self.stop_source();
        self.fetcher.cache().clear();
        self.voice = voice;
        self.state.playing = false;
        self.state.loading = false;
    }

    fn exit_to_editing(&mut self) {
        debug!("Back to editing");
        self.stop_source();
        self.fetcher.cache().clear();
        self.state.mode = Mode::Editing;
        self.state.chunks.clear();
        self.state.active_index = None;
        self.state.playing = false;
        self.state.loading = false;
    }

    /// Release the output. Further messages are still handled but nothing
    /// will sound.
    pub fn shutdown(&mut self) {
        self.stop_source();
        self.driver.shutdown();
        self.state.playing = false;
        self.state.loading = false;
        info!("Sequencer shut down");
    }

    /// Enter loading for the active chunk and start resolving it.
    fn begin_loading(&mut self) {
        let Some(chunk) = self.state.active_chunk() else {
            warn!("No active chunk to load");
            self.state.playing = false;
            self.state.loading = false;
            return;
        };

        self.cycle += 1;
        let ticket = Ticket {
            voice: self.voice.clone(),
            index: chunk.index,
            cycle: self.cycle,
            epoch: self.fetcher.cache().epoch(),
        };
        let text = chunk.text.clone();
        self.state.playing = true;
        self.state.loading = true;
        debug!("Loading chunk {} (cycle {})", ticket.index, ticket.cycle);

        let fetcher = self.fetcher.clone();
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            let result = fetcher
                .resolve_at(ticket.epoch, &ticket.voice, ticket.index, &text)
                .await;
            // A closed inbox means the engine is gone
            let _ = inbox.send(Message::FetchSettled { ticket, result });
        });
    }

    /// Whether a fetch result for `ticket` is still wanted.
    fn is_awaited(&self, ticket: &Ticket) -> bool {
        self.state.playing
            && self.state.loading
            && ticket.cycle == self.cycle
            && ticket.voice == self.voice
            && self.state.active_index == Some(ticket.index)
    }

    fn on_fetch_settled(&mut self, ticket: Ticket, result: Result<AudioBuffer>) {
        if !self.is_awaited(&ticket) {
            debug!(
                "Dropping stale result for chunk {} ({}, cycle {})",
                ticket.index, ticket.voice, ticket.cycle
            );
            return;
        }

        self.state.loading = false;
        match result {
            Ok(buffer) => self.start_sounding(ticket, buffer),
            Err(e) => self.fail(&e),
        }
    }

    fn start_sounding(&mut self, ticket: Ticket, buffer: AudioBuffer) {
        self.stop_source();

        let inbox = self.inbox.clone();
        let ended = ticket.clone();
        let on_ended: EndedCallback = Box::new(move || {
            let _ = inbox.send(Message::Ended(ended));
        });

        if let Err(e) = self.driver.play(buffer, on_ended) {
            self.fail(&e);
            return;
        }

        let index = ticket.index;
        info!(
            "Chunk {}/{} sounding",
            index + 1,
            self.state.chunks.len()
        );
        self.sounding = Some(ticket);
        self.emit(EngineEvent::ChunkStarted { index });

        if let Some(next) = self.state.chunks.get(index + 1) {
            self.prefetcher.schedule(&self.voice, next);
        }
    }

    fn on_ended(&mut self, ticket: &Ticket) {
        if !self.state.playing || self.sounding.as_ref() != Some(ticket) {
            debug!(
                "Ignoring end of chunk {} (cycle {})",
                ticket.index, ticket.cycle
            );
            return;
        }

        self.sounding = None;
        let next = ticket.index + 1;
        if self.state.in_range(next) {
            self.state.active_index = Some(next);
            self.begin_loading();
        } else {
            info!("Finished reading");
            self.state.playing = false;
            self.state.loading = false;
            self.emit(EngineEvent::Finished);
        }
    }

    /// Halt playback and record the error.
    fn fail(&mut self, err: &Error) {
        error!("Playback halted at chunk {:?}: {err}", self.state.active_index);
        self.stop_source();
        self.state.playing = false;
        self.state.loading = false;
        self.fail_soft(err);
    }

    /// Record the error without touching playback.
    fn fail_soft(&mut self, err: &Error) {
        let info = err.info();
        self.state.last_error = Some(info.clone());
        self.emit(EngineEvent::Error(info));
    }

    fn stop_source(&mut self) {
        self.driver.stop();
        self.sounding = None;
    }

    fn emit(&self, event: EngineEvent) {
        match self.events.try_send(event) {
            // Disconnected just means nobody is listening
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(event)) => trace!("Event queue full, dropping {event:?}"),
        }
    }

    fn publish(&self) {
        debug_assert!(self.state.is_consistent(), "inconsistent state: {:?}", self.state);

        let snapshot = self.state.snapshot();
        {
            let mut published = self.published.write();
            if *published == snapshot {
                return;
            }
            published.clone_from(&snapshot);
        }
        debug!(
            "State {:?} at {:?}/{}",
            snapshot.phase, snapshot.active_index, snapshot.chunk_count
        );
        self.emit(EngineEvent::StateChanged(snapshot));
    }
}

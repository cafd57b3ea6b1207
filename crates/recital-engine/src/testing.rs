//! Scripted collaborators for engine tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use recital_audio::{EndedCallback, PayloadDecoder, PlaybackDriver};
use recital_core::{AudioBuffer, Error, Payload, Result, VoiceId};
use recital_synth::Synthesizer;
use tokio::sync::Notify;

/// Synthesizer whose "audio" is the UTF-8 text itself.
#[derive(Default)]
pub struct FakeSynth {
    calls: Mutex<Vec<(String, VoiceId)>>,
    failing: Mutex<HashSet<String>>,
    corrupt: Mutex<HashSet<String>>,
    gates: Mutex<HashMap<(String, String), Arc<Notify>>>,
}

impl FakeSynth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// How many times `text` was synthesized with `voice`.
    pub fn calls_for(&self, text: &str, voice: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(t, v)| t == text && v.as_str() == voice)
            .count()
    }

    pub fn fail_text(&self, text: &str) {
        self.failing.lock().insert(text.to_string());
    }

    pub fn heal_text(&self, text: &str) {
        self.failing.lock().remove(text);
    }

    /// Return an undecodable payload for `text`.
    pub fn corrupt_text(&self, text: &str) {
        self.corrupt.lock().insert(text.to_string());
    }

    /// Hold calls for `(text, voice)` until the returned handle is notified.
    pub fn gate(&self, text: &str, voice: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates
            .lock()
            .insert((text.to_string(), voice.to_string()), gate.clone());
        gate
    }
}

#[async_trait]
impl Synthesizer for FakeSynth {
    async fn synthesize(&self, text: &str, voice: &VoiceId) -> Result<Payload> {
        self.calls.lock().push((text.to_string(), voice.clone()));

        let gate = self
            .gates
            .lock()
            .get(&(text.to_string(), voice.as_str().to_string()))
            .cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.failing.lock().contains(text) {
            return Err(Error::Synthesis(format!("scripted failure for {text:?}")));
        }
        if self.corrupt.lock().contains(text) {
            return Ok(Payload::new(Vec::new(), "audio/test"));
        }
        Ok(Payload::new(text.as_bytes().to_vec(), "audio/test"))
    }
}

/// Decoder mapping each payload byte to one sample.
pub struct FakeDecoder;

#[async_trait]
impl PayloadDecoder for FakeDecoder {
    async fn decode(&self, payload: Payload, sample_rate: u32, channels: u16) -> Result<AudioBuffer> {
        if payload.is_empty() {
            return Err(Error::AudioDecode("empty payload".to_string()));
        }
        let samples: Vec<f32> = payload.data.iter().map(|&b| f32::from(b)).collect();
        Ok(AudioBuffer::new(samples, sample_rate, channels))
    }
}

/// Recover the text a [`FakeDecoder`] buffer was made from.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn buffer_text(buffer: &AudioBuffer) -> String {
    let bytes: Vec<u8> = buffer.samples().iter().map(|&s| s as u8).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[derive(Default)]
struct DriverLog {
    sounding: Option<(String, EndedCallback)>,
    plays: Vec<String>,
    stops: usize,
    overlapping_plays: usize,
    fail_next: bool,
}

/// Driver that records what it was asked to sound.
pub struct RecordingDriver {
    log: Arc<Mutex<DriverLog>>,
}

/// Test-side view of a [`RecordingDriver`].
#[derive(Clone)]
pub struct DriverProbe {
    log: Arc<Mutex<DriverLog>>,
}

pub fn recording_driver() -> (RecordingDriver, DriverProbe) {
    let log = Arc::new(Mutex::new(DriverLog::default()));
    (RecordingDriver { log: log.clone() }, DriverProbe { log })
}

impl PlaybackDriver for RecordingDriver {
    fn play(&mut self, buffer: AudioBuffer, on_ended: EndedCallback) -> Result<()> {
        let mut log = self.log.lock();
        if log.fail_next {
            log.fail_next = false;
            return Err(Error::AudioOutput("scripted device failure".to_string()));
        }
        if log.sounding.is_some() {
            log.overlapping_plays += 1;
        }
        let text = buffer_text(&buffer);
        log.plays.push(text.clone());
        log.sounding = Some((text, on_ended));
        Ok(())
    }

    fn stop(&mut self) {
        let mut log = self.log.lock();
        if log.sounding.take().is_some() {
            log.stops += 1;
        }
    }

    fn is_sounding(&self) -> bool {
        self.log.lock().sounding.is_some()
    }
}

impl DriverProbe {
    /// Text of the sounding source.
    pub fn sounding(&self) -> Option<String> {
        self.log.lock().sounding.as_ref().map(|(text, _)| text.clone())
    }

    pub fn plays(&self) -> Vec<String> {
        self.log.lock().plays.clone()
    }

    pub fn stops(&self) -> usize {
        self.log.lock().stops
    }

    /// Plays issued while another source was still sounding.
    pub fn overlapping_plays(&self) -> usize {
        self.log.lock().overlapping_plays
    }

    pub fn fail_next_play(&self) {
        self.log.lock().fail_next = true;
    }

    /// Let the sounding source run out. Returns false if nothing was sounding.
    pub fn finish(&self) -> bool {
        let taken = self.log.lock().sounding.take();
        match taken {
            Some((_, on_ended)) => {
                on_ended();
                true
            }
            None => false,
        }
    }
}

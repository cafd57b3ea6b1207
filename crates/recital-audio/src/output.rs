//! Playback driver: one sounding source at a time on a cpal output stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, SampleFormat, Stream, StreamConfig,
};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use recital_core::{AudioBuffer, Error, Result};
use tracing::{debug, error, info, warn};

use crate::resample::convert_buffer;

/// Notification fired once when a source finishes on its own.
pub type EndedCallback = Box<dyn FnOnce() + Send + 'static>;

/// Owner of the single currently-sounding audio source.
pub trait PlaybackDriver: Send {
    /// Start sounding `buffer`, replacing anything already sounding.
    ///
    /// Implementations must not do heavy work here; the source counts as
    /// sounding from the moment this returns, even if its samples are still
    /// being prepared elsewhere.
    ///
    /// `on_ended` fires exactly once on natural completion and never after
    /// the source has been stopped or replaced.
    fn play(&mut self, buffer: AudioBuffer, on_ended: EndedCallback) -> Result<()>;

    /// Silence the current source. Safe to call when nothing is sounding.
    fn stop(&mut self);

    /// Whether a source is currently sounding.
    fn is_sounding(&self) -> bool;

    /// Release the output context. Called once at engine shutdown.
    fn shutdown(&mut self) {
        self.stop();
    }
}

struct ActiveSource {
    samples: Vec<f32>,
    position: usize,
    on_ended: Option<EndedCallback>,
}

/// Slot holding at most one active source, shared with the audio callback.
///
/// A source can be reserved before its samples are ready. The reservation
/// counts as sounding and is cancelled by `stop` or by the next reservation.
pub struct SourceSlot {
    active: Option<ActiveSource>,
    reserved: Option<u64>,
    generation: u64,
    volume: f32,
}

impl SourceSlot {
    pub const fn new(volume: f32) -> Self {
        Self {
            active: None,
            reserved: None,
            generation: 0,
            volume,
        }
    }

    /// Drop whatever is sounding and hold the slot for a source still being
    /// prepared. Returns the id to [`install`](Self::install) it under.
    pub fn reserve(&mut self) -> u64 {
        self.active = None;
        self.generation += 1;
        self.reserved = Some(self.generation);
        self.generation
    }

    /// Install the source reserved as `generation`.
    ///
    /// Returns false, dropping `on_ended` unfired, if the reservation was
    /// stopped or replaced in the meantime.
    pub fn install(&mut self, generation: u64, samples: Vec<f32>, on_ended: EndedCallback) -> bool {
        if self.reserved != Some(generation) {
            return false;
        }
        self.start(samples, on_ended);
        true
    }

    /// Give up the reservation `generation`. Returns true if it was current.
    pub fn cancel(&mut self, generation: u64) -> bool {
        if self.reserved == Some(generation) {
            self.reserved = None;
            return true;
        }
        false
    }

    /// Install a new source. A previous source is dropped without its
    /// callback firing.
    pub fn start(&mut self, samples: Vec<f32>, on_ended: EndedCallback) {
        if self.active.is_some() {
            debug!("Replacing sounding source");
        }
        self.reserved = None;
        self.active = Some(ActiveSource {
            samples,
            position: 0,
            on_ended: Some(on_ended),
        });
    }

    /// Drop the current source. Returns true if something was sounding.
    pub fn stop(&mut self) -> bool {
        let reserved = self.reserved.take().is_some();
        self.active.take().is_some() || reserved
    }

    pub const fn is_sounding(&self) -> bool {
        self.active.is_some() || self.reserved.is_some()
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    /// Fill `out` with the next samples, padding with silence.
    ///
    /// When the source runs out it is removed and its callback returned so
    /// the caller can invoke it outside the lock.
    pub fn fill(&mut self, out: &mut [f32]) -> Option<EndedCallback> {
        let Some(source) = self.active.as_mut() else {
            out.fill(0.0);
            return None;
        };

        let remaining = &source.samples[source.position..];
        let count = remaining.len().min(out.len());
        for (dst, &src) in out.iter_mut().zip(&remaining[..count]) {
            let s = src * self.volume;
            // Soft clipping using tanh for smooth limiting
            *dst = if s.abs() > 0.9 { s.tanh() } else { s };
        }
        out[count..].fill(0.0);
        source.position += count;

        if source.position >= source.samples.len() {
            return self.active.take().and_then(|mut done| done.on_ended.take());
        }
        None
    }
}

enum OutputCommand {
    Play(PendingSource),
    Suspend,
    Shutdown,
}

/// A decoded buffer on its way to the output thread.
struct PendingSource {
    generation: u64,
    buffer: AudioBuffer,
    on_ended: EndedCallback,
}

/// Convert `pending` to the device format and install it if still wanted.
///
/// Runs on the output thread so resampling never blocks the caller of
/// `play`. A buffer that cannot be converted is skipped: its reservation is
/// released and `on_ended` fires so playback moves on.
fn install_converted(
    slot: &Mutex<SourceSlot>,
    pending: PendingSource,
    sample_rate: u32,
    channels: u16,
) -> bool {
    let PendingSource {
        generation,
        buffer,
        on_ended,
    } = pending;

    match convert_buffer(&buffer, sample_rate, channels) {
        Ok(samples) => {
            debug!(
                "Playing {:.2}s buffer ({} device samples)",
                buffer.duration().as_secs_f64(),
                samples.len()
            );
            let installed = slot.lock().install(generation, samples, on_ended);
            if !installed {
                debug!("Source {generation} was stopped before it was ready");
            }
            installed
        }
        Err(e) => {
            error!("Skipping buffer the output cannot take: {e}");
            let cancelled = slot.lock().cancel(generation);
            if cancelled {
                on_ended();
            }
            false
        }
    }
}

/// Handle to the output thread that owns the cpal stream.
struct OutputContext {
    command_tx: Sender<OutputCommand>,
    thread: Option<JoinHandle<()>>,
    failed: Arc<AtomicBool>,
    device_name: String,
}

impl OutputContext {
    /// Spawn the output thread and wait for the stream to come up.
    fn open(slot: Arc<Mutex<SourceSlot>>) -> Result<Self> {
        let (command_tx, command_rx) = unbounded();
        let (ready_tx, ready_rx) = bounded(1);
        let failed = Arc::new(AtomicBool::new(false));
        let failed_clone = failed.clone();

        // cpal::Stream is not Send, so it lives and dies on this thread
        let thread = std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || match open_stream(slot.clone(), failed_clone) {
                Ok((stream, info)) => {
                    let (sample_rate, channels) = (info.0, info.1);
                    let _ = ready_tx.send(Ok(info));
                    run_output(&stream, &command_rx, &slot, sample_rate, channels);
                    debug!("Audio output thread exiting");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn output thread: {e}")))?;

        let (sample_rate, channels, device_name) = ready_rx
            .recv()
            .map_err(|e| Error::AudioOutput(format!("Output thread died during setup: {e}")))??;

        info!(
            "Audio output initialized: {} Hz, {} channels, device: {}",
            sample_rate, channels, device_name
        );

        Ok(Self {
            command_tx,
            thread: Some(thread),
            failed,
            device_name,
        })
    }

    fn is_usable(&self) -> bool {
        !self.failed.load(Ordering::SeqCst) && self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn send(&self, command: OutputCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|e| Error::AudioOutput(format!("Output thread unavailable: {e}")))
    }

    fn close(&mut self) {
        let _ = self.command_tx.send(OutputCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Audio output thread panicked");
            }
        }
    }
}

fn run_output(
    stream: &Stream,
    command_rx: &Receiver<OutputCommand>,
    slot: &Mutex<SourceSlot>,
    sample_rate: u32,
    channels: u16,
) {
    while let Ok(command) = command_rx.recv() {
        match command {
            OutputCommand::Play(pending) => {
                if install_converted(slot, pending, sample_rate, channels) {
                    // Platform policies may have suspended the stream
                    if let Err(e) = stream.play() {
                        error!("Failed to resume stream: {e}");
                    }
                }
            }
            OutputCommand::Suspend => {
                if let Err(e) = stream.pause() {
                    debug!("Failed to pause stream: {e}");
                }
            }
            OutputCommand::Shutdown => break,
        }
    }
}

type StreamInfo = (u32, u16, String);

fn open_stream(slot: Arc<Mutex<SourceSlot>>, failed: Arc<AtomicBool>) -> Result<(Stream, StreamInfo)> {
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::AudioOutput("No output device found".to_string()))?;

    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let supported_config = device
        .default_output_config()
        .map_err(|e| Error::AudioOutput(format!("Failed to get output config: {e}")))?;

    debug!("Supported output config: {:?}", supported_config);

    let sample_format = supported_config.sample_format();
    let config: StreamConfig = supported_config.into();

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, slot, failed)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, slot, failed)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, slot, failed)?,
        _ => {
            return Err(Error::AudioOutput(format!(
                "Unsupported sample format: {sample_format:?}"
            )));
        }
    };

    stream
        .play()
        .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {e}")))?;

    Ok((stream, (config.sample_rate.0, config.channels, device_name)))
}

fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
    device: &Device,
    config: &StreamConfig,
    slot: Arc<Mutex<SourceSlot>>,
    failed: Arc<AtomicBool>,
) -> Result<Stream> {
    let err_fn = move |err| {
        error!("Audio stream error: {err}");
        failed.store(true, Ordering::SeqCst);
    };

    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                let ended = slot.lock().fill(&mut scratch);

                for (sample, &value) in data.iter_mut().zip(&scratch) {
                    *sample = T::from_sample(value);
                }

                if let Some(on_ended) = ended {
                    on_ended();
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {e}")))
}

/// Playback driver backed by the default cpal output device.
///
/// The output context is created on the first `play`, reused afterwards and
/// reopened only if the stream reported a failure.
pub struct CpalDriver {
    slot: Arc<Mutex<SourceSlot>>,
    output: Option<OutputContext>,
}

impl CpalDriver {
    /// Create a driver. No device is touched until the first `play`.
    pub fn new(volume: f32) -> Self {
        Self {
            slot: Arc::new(Mutex::new(SourceSlot::new(volume.clamp(0.0, 1.0)))),
            output: None,
        }
    }

    /// Whether the output context has been opened.
    pub const fn has_output(&self) -> bool {
        self.output.is_some()
    }

    /// Name of the device in use, once opened.
    pub fn device_name(&self) -> Option<&str> {
        self.output.as_ref().map(|o| o.device_name.as_str())
    }

    /// Set the volume (0.0 to 1.0).
    pub fn set_volume(&self, volume: f32) {
        self.slot.lock().set_volume(volume);
    }

    fn ensure_output(&mut self) -> Result<&OutputContext> {
        if self.output.as_ref().is_some_and(|o| !o.is_usable()) {
            warn!("Audio output no longer usable, reopening");
            if let Some(mut stale) = self.output.take() {
                stale.close();
            }
        }

        if self.output.is_none() {
            self.output = Some(OutputContext::open(self.slot.clone())?);
        }

        self.output
            .as_ref()
            .ok_or_else(|| Error::Internal("Output context missing".to_string()))
    }
}

impl PlaybackDriver for CpalDriver {
    fn play(&mut self, buffer: AudioBuffer, on_ended: EndedCallback) -> Result<()> {
        self.stop();

        let slot = self.slot.clone();
        let output = self.ensure_output()?;
        let generation = slot.lock().reserve();
        let pending = PendingSource {
            generation,
            buffer,
            on_ended,
        };
        if let Err(e) = output.send(OutputCommand::Play(pending)) {
            slot.lock().cancel(generation);
            return Err(e);
        }
        Ok(())
    }

    fn stop(&mut self) {
        if self.slot.lock().stop() {
            debug!("Stopped sounding source");
            if let Some(output) = &self.output {
                let _ = output.send(OutputCommand::Suspend);
            }
        }
    }

    fn is_sounding(&self) -> bool {
        self.slot.lock().is_sounding()
    }

    fn shutdown(&mut self) {
        self.stop();
        if let Some(mut output) = self.output.take() {
            output.close();
            info!("Audio output closed");
        }
    }
}

impl Drop for CpalDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// List available output devices.
pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();

    let devices: Vec<String> = host
        .output_devices()
        .map_err(|e| Error::AudioOutput(format!("Failed to list devices: {e}")))?
        .filter_map(|d| d.name().ok())
        .collect();

    Ok(devices)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, EndedCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let clone = count.clone();
        (
            count,
            Box::new(move || {
                clone.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn test_fill_reports_end_exactly_once() {
        let mut slot = SourceSlot::new(1.0);
        let (count, on_ended) = counter();
        slot.start(vec![0.5; 6], on_ended);

        let mut out = [0.0f32; 4];
        assert!(slot.fill(&mut out).is_none());
        assert_eq!(out, [0.5; 4]);

        let ended = slot.fill(&mut out).unwrap();
        assert_eq!(out, [0.5, 0.5, 0.0, 0.0]);
        ended();
        assert!(!slot.is_sounding());

        assert!(slot.fill(&mut out).is_none());
        assert_eq!(out, [0.0; 4]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_suppresses_callback() {
        let mut slot = SourceSlot::new(1.0);
        let (count, on_ended) = counter();
        slot.start(vec![0.1; 2], on_ended);

        assert!(slot.stop());
        assert!(!slot.stop());

        let mut out = [1.0f32; 4];
        assert!(slot.fill(&mut out).is_none());
        assert_eq!(out, [0.0; 4]);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_start_replaces_previous_source() {
        let mut slot = SourceSlot::new(1.0);
        let (first, first_cb) = counter();
        let (second, second_cb) = counter();

        slot.start(vec![0.1; 8], first_cb);
        slot.start(vec![0.2; 2], second_cb);

        let mut out = [0.0f32; 4];
        slot.fill(&mut out).unwrap()();
        assert_eq!(out, [0.2, 0.2, 0.0, 0.0]);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_volume_and_limiting() {
        let mut slot = SourceSlot::new(0.5);
        slot.start(vec![1.0, 4.0], Box::new(|| {}));
        let mut out = [0.0f32; 2];
        let _ = slot.fill(&mut out);
        assert!((out[0] - 0.5).abs() < 1e-6);
        assert!(out[1] < 1.0);
    }

    #[test]
    fn test_reservation_installs_only_while_current() {
        let mut slot = SourceSlot::new(1.0);
        let (count, on_ended) = counter();

        let stopped = slot.reserve();
        assert!(slot.is_sounding());
        assert!(slot.stop());
        assert!(!slot.install(stopped, vec![0.1; 2], on_ended));

        let replaced = slot.reserve();
        let current = slot.reserve();
        let (_, stale_cb) = counter();
        assert!(!slot.install(replaced, vec![0.1; 2], stale_cb));
        let (current_count, current_cb) = counter();
        assert!(slot.install(current, vec![0.3; 2], current_cb));

        let mut out = [0.0f32; 4];
        slot.fill(&mut out).unwrap()();
        assert_eq!(out, [0.3, 0.3, 0.0, 0.0]);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(current_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_output_side_conversion() {
        let slot = Mutex::new(SourceSlot::new(1.0));
        let generation = slot.lock().reserve();
        let (count, on_ended) = counter();
        let pending = PendingSource {
            generation,
            buffer: AudioBuffer::new(vec![0.25; 2_400], 24_000, 1),
            on_ended,
        };

        // 0.1 s of mono becomes 0.1 s of 48 kHz stereo
        assert!(install_converted(&slot, pending, 48_000, 2));
        let mut out = vec![0.0f32; 9_600];
        let ended = slot.lock().fill(&mut out);
        assert!(ended.is_some());
        assert!((out[4_800] - 0.25).abs() < 0.05);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unconvertible_buffer_is_skipped() {
        let slot = Mutex::new(SourceSlot::new(1.0));
        let generation = slot.lock().reserve();
        let (count, on_ended) = counter();
        let pending = PendingSource {
            generation,
            buffer: AudioBuffer::new(vec![0.25; 8], 24_000, 1),
            on_ended,
        };

        assert!(!install_converted(&slot, pending, 0, 2));
        assert!(!slot.lock().is_sounding());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stopped_reservation_drops_converted_source() {
        let slot = Mutex::new(SourceSlot::new(1.0));
        let generation = slot.lock().reserve();
        slot.lock().stop();
        let (count, on_ended) = counter();
        let pending = PendingSource {
            generation,
            buffer: AudioBuffer::new(vec![0.25; 8], 24_000, 1),
            on_ended,
        };

        assert!(!install_converted(&slot, pending, 24_000, 1));
        assert!(!slot.lock().is_sounding());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_driver_is_lazy() {
        // Opening the device requires audio hardware; construction must not
        let mut driver = CpalDriver::new(0.8);
        assert!(!driver.has_output());
        assert!(!driver.is_sounding());
        driver.stop();
        driver.shutdown();
        assert!(driver.device_name().is_none());
    }
}

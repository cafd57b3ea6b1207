//! Sample-rate and channel conversion using rubato.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use recital_core::{AudioBuffer, Error, Result};
use rubato::{FftFixedIn, Resampler as RubatoResampler};
use tracing::debug;

/// Frames fed to rubato per call.
const CHUNK_FRAMES: usize = 1024;

/// Whole-buffer resampler for matching the device sample rate.
pub struct Resampler {
    #[allow(clippy::struct_field_names)]
    resampler: Option<FftFixedIn<f32>>,
    input_rate: u32,
    output_rate: u32,
    channels: usize,
}

impl Resampler {
    /// Create a new resampler.
    pub fn new(input_rate: u32, output_rate: u32, channels: usize) -> Result<Self> {
        if input_rate == 0 || output_rate == 0 || channels == 0 {
            return Err(Error::InvalidArgument(format!(
                "Cannot resample {input_rate}Hz -> {output_rate}Hz with {channels} channels"
            )));
        }

        let resampler = if input_rate == output_rate {
            None
        } else {
            debug!(
                "Resampler created: {}Hz -> {}Hz, {} channels",
                input_rate, output_rate, channels
            );
            Some(
                FftFixedIn::new(
                    input_rate as usize,
                    output_rate as usize,
                    CHUNK_FRAMES,
                    2,
                    channels,
                )
                .map_err(|e| Error::AudioOutput(format!("Failed to create resampler: {e}")))?,
            )
        };

        Ok(Self {
            resampler,
            input_rate,
            output_rate,
            channels,
        })
    }

    /// Check if resampling is needed.
    pub const fn needs_resampling(&self) -> bool {
        self.input_rate != self.output_rate
    }

    /// Get the input sample rate.
    pub const fn input_rate(&self) -> u32 {
        self.input_rate
    }

    /// Get the output sample rate.
    pub const fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Get the number of channels.
    pub const fn channels(&self) -> usize {
        self.channels
    }

    /// Resample a complete interleaved signal.
    ///
    /// The tail is zero-padded to a full chunk and the filter delay is
    /// trimmed, so the output length tracks `input * output_rate / input_rate`.
    pub fn process_all(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(input.to_vec());
        };

        let mut planes = deinterleave(input, self.channels);
        let input_frames = planes.first().map_or(0, Vec::len);
        if input_frames == 0 {
            return Ok(Vec::new());
        }

        let delay = resampler.output_delay();
        let expected_frames = (input_frames as f64 * f64::from(self.output_rate)
            / f64::from(self.input_rate))
        .round() as usize;

        // Pad so the delayed tail also makes it out of the filter
        let delay_in = (delay as f64 * f64::from(self.input_rate) / f64::from(self.output_rate))
            .ceil() as usize;
        let padded =
            (input_frames + delay_in).div_ceil(CHUNK_FRAMES) * CHUNK_FRAMES + CHUNK_FRAMES;
        for plane in &mut planes {
            plane.resize(padded, 0.0);
        }

        let mut output: Vec<Vec<f32>> = vec![Vec::new(); self.channels];
        for start in (0..padded).step_by(CHUNK_FRAMES) {
            let chunk: Vec<&[f32]> = planes
                .iter()
                .map(|plane| &plane[start..start + CHUNK_FRAMES])
                .collect();
            let resampled = resampler
                .process(&chunk, None)
                .map_err(|e| Error::AudioOutput(format!("Resample failed: {e}")))?;
            for (out, part) in output.iter_mut().zip(resampled) {
                out.extend(part);
            }
        }
        resampler.reset();

        let available = output[0].len().saturating_sub(delay);
        Ok(interleave(&output, delay, expected_frames.min(available)))
    }
}

/// Convert a decoded buffer to the device rate and channel layout.
pub fn convert_buffer(buffer: &AudioBuffer, output_rate: u32, output_channels: u16) -> Result<Vec<f32>> {
    let mapped = remap_channels(
        buffer.samples(),
        usize::from(buffer.channels()),
        usize::from(output_channels.max(1)),
    );
    let mut resampler = Resampler::new(
        buffer.sample_rate(),
        output_rate,
        usize::from(output_channels.max(1)),
    )?;
    resampler.process_all(&mapped)
}

/// Map interleaved samples from one channel count to another.
///
/// Downmixing to mono averages; otherwise output channel `c` copies input
/// channel `c % input_channels`.
pub fn remap_channels(input: &[f32], input_channels: usize, output_channels: usize) -> Vec<f32> {
    if input_channels == output_channels || input_channels == 0 {
        return input.to_vec();
    }

    let frames = input.len() / input_channels;
    let mut output = Vec::with_capacity(frames * output_channels);

    for frame in input.chunks_exact(input_channels) {
        if output_channels == 1 {
            output.push(frame.iter().sum::<f32>() / input_channels as f32);
        } else {
            for ch in 0..output_channels {
                output.push(frame[ch % input_channels]);
            }
        }
    }

    output
}

/// Split interleaved samples into one vector per channel.
fn deinterleave(input: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = input.len() / channels;
    let mut planes = vec![Vec::with_capacity(frames); channels];

    for frame in input.chunks_exact(channels) {
        for (plane, &sample) in planes.iter_mut().zip(frame) {
            plane.push(sample);
        }
    }

    planes
}

/// Interleave `frames` frames of the planes, starting at `offset`.
fn interleave(planes: &[Vec<f32>], offset: usize, frames: usize) -> Vec<f32> {
    let mut output = Vec::with_capacity(frames * planes.len());

    for frame in offset..offset + frames {
        for plane in planes {
            output.push(plane[frame]);
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_resampling() {
        let mut resampler = Resampler::new(48000, 48000, 2).unwrap();
        assert!(!resampler.needs_resampling());

        let input = vec![0.5f32; 2048];
        let output = resampler.process_all(&input).unwrap();
        assert_eq!(output.len(), input.len());
    }

    #[test]
    fn test_resampler_creation() {
        let resampler = Resampler::new(24000, 48000, 2).unwrap();
        assert!(resampler.needs_resampling());
        assert_eq!(resampler.input_rate(), 24000);
        assert_eq!(resampler.output_rate(), 48000);
        assert_eq!(resampler.channels(), 2);
    }

    #[test]
    fn test_rejects_zero_rate() {
        assert!(Resampler::new(0, 48000, 1).is_err());
    }

    #[test]
    fn test_upsample_length_tracks_ratio() {
        let mut resampler = Resampler::new(24000, 48000, 1).unwrap();
        let input = vec![0.25f32; 2400];
        let output = resampler.process_all(&input).unwrap();
        assert_eq!(output.len(), 4800);
    }

    #[test]
    fn test_remap_mono_to_stereo_and_back() {
        let stereo = remap_channels(&[0.1, 0.2], 1, 2);
        assert_eq!(stereo, vec![0.1, 0.1, 0.2, 0.2]);

        let mono = remap_channels(&[0.2, 0.4, 0.6, 0.8], 2, 1);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!((mono[1] - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_convert_buffer_maps_channels() {
        let buffer = AudioBuffer::new(vec![0.5f32; 100], 48000, 1);
        let converted = convert_buffer(&buffer, 48000, 2).unwrap();
        assert_eq!(converted.len(), 200);
    }
}

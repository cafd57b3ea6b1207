//! Payload decoding: headerless PCM and symphonia-supported containers.

use std::io::Cursor;

use async_trait::async_trait;
use recital_core::{AudioBuffer, Error, Payload, Result};
use symphonia::core::{
    audio::AudioBufferRef,
    codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL},
    formats::{FormatOptions, FormatReader},
    io::{MediaSourceStream, MediaSourceStreamOptions},
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, error, trace};

/// Turns an encoded payload into a playable buffer.
#[async_trait]
pub trait PayloadDecoder: Send + Sync {
    /// Decode `payload`. `sample_rate` and `channels` describe headerless
    /// payloads; self-describing containers report their own format.
    async fn decode(&self, payload: Payload, sample_rate: u32, channels: u16) -> Result<AudioBuffer>;
}

/// Default decoder: signed 16-bit little-endian PCM, falling back to
/// symphonia for container formats. Work runs on the blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct PcmDecoder;

impl PcmDecoder {
    pub const fn new() -> Self {
        Self
    }

    /// Decode synchronously.
    pub fn decode_blocking(payload: &Payload, sample_rate: u32, channels: u16) -> Result<AudioBuffer> {
        if payload.is_empty() {
            return Err(Error::AudioDecode("Empty payload".to_string()));
        }

        if payload.is_raw_pcm() {
            let rate = match payload.advertised_rate() {
                Some(advertised) if advertised != sample_rate => {
                    debug!("Payload advertises {advertised} Hz, overriding {sample_rate} Hz");
                    advertised
                }
                _ => sample_rate,
            };
            return decode_pcm_s16le(&payload.data, rate, channels);
        }

        let mut decoder = ContainerDecoder::from_bytes(&payload.data, Some(&payload.mime_type))?;
        let mut samples = Vec::new();
        while let Some(packet) = decoder.decode_next()? {
            samples.extend(packet);
        }
        if samples.is_empty() {
            return Err(Error::AudioDecode("Payload contained no audio".to_string()));
        }
        Ok(AudioBuffer::new(samples, decoder.sample_rate(), decoder.channels()))
    }
}

#[async_trait]
impl PayloadDecoder for PcmDecoder {
    async fn decode(&self, payload: Payload, sample_rate: u32, channels: u16) -> Result<AudioBuffer> {
        tokio::task::spawn_blocking(move || Self::decode_blocking(&payload, sample_rate, channels))
            .await
            .map_err(|e| Error::Internal(format!("Decode task failed: {e}")))?
    }
}

/// Decode headerless signed 16-bit little-endian PCM.
pub fn decode_pcm_s16le(data: &[u8], sample_rate: u32, channels: u16) -> Result<AudioBuffer> {
    let frame_bytes = 2 * usize::from(channels.max(1));
    if data.len() % frame_bytes != 0 {
        return Err(Error::AudioDecode(format!(
            "PCM payload of {} bytes is not a whole number of {}-channel frames",
            data.len(),
            channels
        )));
    }

    let samples: Vec<f32> = data
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / f32::from(i16::MAX))
        .collect();

    trace!("Decoded {} PCM samples", samples.len());
    Ok(AudioBuffer::new(samples, sample_rate, channels))
}

/// Container decoder wrapping symphonia.
pub struct ContainerDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
}

impl ContainerDecoder {
    /// Create a new decoder from a byte buffer.
    pub fn from_bytes(data: &[u8], mime_hint: Option<&str>) -> Result<Self> {
        let cursor = Cursor::new(data.to_vec());
        let mss = MediaSourceStream::new(Box::new(cursor), MediaSourceStreamOptions::default());

        let mut hint = Hint::new();
        if let Some(mime) = mime_hint {
            if mime.contains("wav") || mime.contains("wave") {
                hint.with_extension("wav");
            } else if mime.contains("mp3") || mime.contains("mpeg") {
                hint.with_extension("mp3");
            } else if mime.contains("ogg") || mime.contains("opus") || mime.contains("vorbis") {
                hint.with_extension("ogg");
            } else if mime.contains("flac") {
                hint.with_extension("flac");
            } else if mime.contains("mp4") || mime.contains("aac") {
                hint.with_extension("m4a");
            }
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| Error::AudioDecode(format!("Failed to probe format: {e}")))?;

        let format = probed.format;

        // Find the first audio track
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::AudioDecode("No audio tracks found".to_string()))?;

        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| Error::AudioDecode("Unknown sample rate".to_string()))?;
        let channels = track.codec_params.channels.map_or(1, |c| c.count() as u16);

        debug!(
            "Audio track: id={}, sample_rate={}, channels={}",
            track_id, sample_rate, channels
        );

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| Error::AudioDecode(format!("Failed to create decoder: {e}")))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
        })
    }

    /// Get the sample rate.
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Get the number of channels.
    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Decode the next packet and return interleaved f32 samples.
    pub fn decode_next(&mut self) -> Result<Option<Vec<f32>>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None); // End of stream
                }
                Err(e) => {
                    return Err(Error::AudioDecode(format!("Failed to read packet: {e}")));
                }
            };

            // Skip packets for other tracks
            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    return Ok(Some(audio_buffer_to_f32(&decoded)));
                }
                Err(symphonia::core::errors::Error::DecodeError(e)) => {
                    // Log and skip corrupt frames
                    error!("Decode error (skipping): {e}");
                }
                Err(e) => {
                    return Err(Error::AudioDecode(format!("Decode failed: {e}")));
                }
            }
        }
    }
}

/// Convert a symphonia buffer to interleaved f32 samples.
fn audio_buffer_to_f32(buffer: &AudioBufferRef<'_>) -> Vec<f32> {
    match buffer {
        AudioBufferRef::F32(buf) => interleave_planes(buf.planes().planes(), |s| s),
        AudioBufferRef::F64(buf) => interleave_planes(buf.planes().planes(), |s| s as f32),
        AudioBufferRef::S32(buf) => {
            interleave_planes(buf.planes().planes(), |s| s as f32 / i32::MAX as f32)
        }
        AudioBufferRef::S16(buf) => interleave_planes(buf.planes().planes(), |s| {
            f32::from(s) / f32::from(i16::MAX)
        }),
        AudioBufferRef::U8(buf) => interleave_planes(buf.planes().planes(), |s| {
            (f32::from(s) - 128.0) / 128.0
        }),
        _ => Vec::new(),
    }
}

fn interleave_planes<T: Copy>(planes: &[&[T]], convert: impl Fn(T) -> f32) -> Vec<f32> {
    let Some(first) = planes.first() else {
        return Vec::new();
    };

    let frames = first.len();
    let mut output = Vec::with_capacity(frames * planes.len());

    for frame in 0..frames {
        for plane in planes {
            output.push(convert(plane[frame]));
        }
    }

    output
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Minimal 16-bit PCM WAV file.
    fn wav_bytes(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
        let data_len = (samples.len() * 2) as u32;
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVEfmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&(sample_rate * u32::from(channels) * 2).to_le_bytes());
        out.extend_from_slice(&(channels * 2).to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        for s in samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }

    #[test]
    fn test_pcm_decode() {
        let data: Vec<u8> = [0i16, i16::MAX, -i16::MAX, 0]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let buffer = decode_pcm_s16le(&data, 24_000, 1).unwrap();
        assert_eq!(buffer.samples(), &[0.0, 1.0, -1.0, 0.0]);
        assert_eq!(buffer.sample_rate(), 24_000);
    }

    #[test]
    fn test_pcm_rejects_partial_frame() {
        let err = decode_pcm_s16le(&[0, 0, 0], 24_000, 1).unwrap_err();
        assert!(matches!(err, Error::AudioDecode(_)));
    }

    #[test]
    fn test_advertised_rate_wins() {
        let payload = Payload::new(vec![0u8; 8], "audio/L16;codec=pcm;rate=16000");
        let buffer = PcmDecoder::decode_blocking(&payload, 24_000, 1).unwrap();
        assert_eq!(buffer.sample_rate(), 16_000);
        assert_eq!(buffer.frames(), 4);
    }

    #[test]
    fn test_empty_payload_is_decode_error() {
        let payload = Payload::new(Vec::new(), "audio/pcm");
        let err = PcmDecoder::decode_blocking(&payload, 24_000, 1).unwrap_err();
        assert_eq!(err.kind(), recital_core::ErrorKind::Decode);
    }

    #[test]
    fn test_garbage_container_is_decode_error() {
        let payload = Payload::new(vec![1u8, 2, 3, 4, 5, 6, 7, 8], "audio/mpeg");
        assert!(matches!(
            PcmDecoder::decode_blocking(&payload, 24_000, 1),
            Err(Error::AudioDecode(_))
        ));
    }

    #[tokio::test]
    async fn test_wav_container_decode() {
        let samples: Vec<i16> = (0..480).map(|i| (i * 10) as i16).collect();
        let payload = Payload::new(wav_bytes(&samples, 8_000, 2), "audio/wav");
        let buffer = PcmDecoder::new().decode(payload, 24_000, 1).await.unwrap();
        assert_eq!(buffer.sample_rate(), 8_000);
        assert_eq!(buffer.channels(), 2);
        assert_eq!(buffer.samples().len(), 480);
    }
}

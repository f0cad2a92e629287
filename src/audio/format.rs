//! PCM format description and immutable audio buffers

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Encoding of a single PCM sample on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    /// Unsigned 8-bit, centred on 128
    U8,
    /// Signed 8-bit
    I8,
    /// Signed 16-bit little-endian
    I16,
    /// Signed 32-bit little-endian
    I32,
}

impl SampleFormat {
    /// Size of one sample of one channel in bytes
    pub fn bytes(self) -> usize {
        match self {
            SampleFormat::U8 | SampleFormat::I8 => 1,
            SampleFormat::I16 => 2,
            SampleFormat::I32 => 4,
        }
    }

    pub fn bits(self) -> u16 {
        self.bytes() as u16 * 8
    }

    /// Byte value that encodes silence in every byte position
    pub fn silence_byte(self) -> u8 {
        match self {
            SampleFormat::U8 => 128,
            _ => 0,
        }
    }

    /// Decode one sample to the `[-1.0, 1.0)` range.
    ///
    /// `raw` must hold exactly [`SampleFormat::bytes`] bytes.
    pub fn to_f32(self, raw: &[u8]) -> f32 {
        match self {
            SampleFormat::U8 => (raw[0] as f32 - 128.0) / 128.0,
            SampleFormat::I8 => raw[0] as i8 as f32 / 128.0,
            SampleFormat::I16 => i16::from_le_bytes([raw[0], raw[1]]) as f32 / 32768.0,
            SampleFormat::I32 => {
                i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f32 / 2_147_483_648.0
            }
        }
    }

    /// Encode one sample, clipping to `[-1.0, 1.0]` and truncating.
    pub fn push_f32(self, value: f32, out: &mut Vec<u8>) {
        let v = value.clamp(-1.0, 1.0);
        match self {
            SampleFormat::U8 => out.push(((v + 1.0) / 2.0 * 255.0) as u8),
            SampleFormat::I8 => out.push((v * 127.0) as i8 as u8),
            SampleFormat::I16 => out.extend_from_slice(&((v * 32767.0) as i16).to_le_bytes()),
            SampleFormat::I32 => {
                out.extend_from_slice(&((v as f64 * 2_147_483_647.0) as i32).to_le_bytes())
            }
        }
    }
}

/// PCM stream format. Immutable once a session starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    sample_rate: u32,
    sample_format: SampleFormat,
    channels: u16,
}

impl AudioFormat {
    /// Format for the WAV streaming path: 8-bit is unsigned, 16-bit is signed.
    pub fn new(sample_rate: u32, bits_per_sample: u16, channels: u16) -> Result<Self, ConfigError> {
        let sample_format = match bits_per_sample {
            8 => SampleFormat::U8,
            16 => SampleFormat::I16,
            other => return Err(ConfigError::UnsupportedBitDepth(other)),
        };
        Self::with_sample_format(sample_rate, sample_format, channels)
    }

    /// Format announced by the microphone header (signed samples).
    pub fn from_sample_width(
        sample_rate: u32,
        sample_width: u32,
        channels: u16,
    ) -> Result<Self, ConfigError> {
        let sample_format = match sample_width {
            1 => SampleFormat::I8,
            2 => SampleFormat::I16,
            4 => SampleFormat::I32,
            other => return Err(ConfigError::UnsupportedSampleWidth(other)),
        };
        Self::with_sample_format(sample_rate, sample_format, channels)
    }

    pub fn with_sample_format(
        sample_rate: u32,
        sample_format: SampleFormat,
        channels: u16,
    ) -> Result<Self, ConfigError> {
        if sample_rate == 0 {
            return Err(ConfigError::InvalidSampleRate);
        }
        if !matches!(channels, 1 | 2) {
            return Err(ConfigError::UnsupportedChannels(channels));
        }
        Ok(Self {
            sample_rate,
            sample_format,
            channels,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn sample_format(&self) -> SampleFormat {
        self.sample_format
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.sample_format.bits()
    }

    /// Bytes of one sample across all channels (one frame)
    pub fn bytes_per_sample(&self) -> usize {
        self.sample_format.bytes() * self.channels as usize
    }

    pub fn bytes_per_sec(&self) -> u64 {
        self.sample_rate as u64 * self.bytes_per_sample() as u64
    }

    /// Whole frames in `ms` milliseconds, rounded down
    pub fn frames_for_ms(&self, ms: u32) -> u64 {
        self.sample_rate as u64 * ms as u64 / 1000
    }

    /// Bytes of `ms` milliseconds of audio, whole frames only
    pub fn bytes_for_ms(&self, ms: u32) -> usize {
        self.frames_for_ms(ms) as usize * self.bytes_per_sample()
    }

    /// Playback time of `bytes` bytes in this format
    pub fn duration_of(&self, bytes: usize) -> Duration {
        Duration::from_secs_f64(bytes as f64 / self.bytes_per_sec() as f64)
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} Hz, {}-bit {:?}, {}-channel",
            self.sample_rate,
            self.bits_per_sample(),
            self.sample_format,
            self.channels
        )
    }
}

/// Immutable PCM payload tagged with the format it was produced under.
///
/// Cloning shares the underlying bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBuffer {
    format: AudioFormat,
    data: Bytes,
}

impl AudioBuffer {
    pub fn new(format: AudioFormat, data: impl Into<Bytes>) -> Self {
        Self {
            format,
            data: data.into(),
        }
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn duration(&self) -> Duration {
        self.format.duration_of(self.data.len())
    }
}

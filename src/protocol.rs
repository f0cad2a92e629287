//! Microphone stream header
//!
//! Sent once per connection, right after accept and before any audio:
//!
//! ```text
//! +----------------+--------------------+-------------------+
//! | sample_rate u32| sample_width u32   | chunk_frames u32  |   big-endian
//! +----------------+--------------------+-------------------+
//! ```
//!
//! The raw WAV stream has no header at all; both ends must be started with
//! the same format flags.

use bytes::{Buf, BufMut};

use crate::audio::format::AudioFormat;
use crate::error::{ConfigError, NetworkError};

/// Encoded header length in bytes
pub const HEADER_LEN: usize = 12;

/// Format announcement for microphone clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub sample_rate: u32,
    /// Bytes per sample: 1, 2 or 4
    pub sample_width: u32,
    /// Frames per broadcast chunk
    pub chunk_frames: u32,
}

impl StreamHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        let mut buf = &mut out[..];
        buf.put_u32(self.sample_rate);
        buf.put_u32(self.sample_width);
        buf.put_u32(self.chunk_frames);
        out
    }

    pub fn decode(raw: &[u8]) -> Result<Self, NetworkError> {
        if raw.len() < HEADER_LEN {
            return Err(NetworkError::InvalidHeader(format!(
                "expected {} bytes, got {}",
                HEADER_LEN,
                raw.len()
            )));
        }
        let mut buf = raw;
        let header = Self {
            sample_rate: buf.get_u32(),
            sample_width: buf.get_u32(),
            chunk_frames: buf.get_u32(),
        };
        if header.chunk_frames == 0 {
            return Err(NetworkError::InvalidHeader("zero chunk size".to_string()));
        }
        Ok(header)
    }

    /// Mono format described by this header
    pub fn audio_format(&self) -> Result<AudioFormat, ConfigError> {
        AudioFormat::from_sample_width(self.sample_rate, self.sample_width, 1)
    }

    /// Bytes in one broadcast chunk
    pub fn chunk_bytes(&self) -> usize {
        self.chunk_frames as usize * self.sample_width as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_layout_is_big_endian() {
        let header = StreamHeader {
            sample_rate: 44100,
            sample_width: 2,
            chunk_frames: 1024,
        };
        assert_eq!(
            header.encode(),
            [0, 0, 0xac, 0x44, 0, 0, 0, 2, 0, 0, 4, 0]
        );
        assert_eq!(StreamHeader::decode(&header.encode()).unwrap(), header);
        assert_eq!(header.chunk_bytes(), 2048);
    }

    #[test]
    fn test_short_header_rejected() {
        assert!(matches!(
            StreamHeader::decode(&[0u8; 11]),
            Err(NetworkError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_header_format() {
        let header = StreamHeader {
            sample_rate: 16000,
            sample_width: 4,
            chunk_frames: 256,
        };
        let format = header.audio_format().unwrap();
        assert_eq!(format.channels(), 1);
        assert_eq!(format.bytes_per_sec(), 64000);

        let bad = StreamHeader {
            sample_width: 3,
            ..header
        };
        assert!(bad.audio_format().is_err());
    }
}

//! WAV container reading with format validation
//!
//! Source files are expected to be short, so the whole payload is read into
//! one buffer. Every failure is per-file: callers log it and skip the file.

use std::path::Path;

use crate::audio::format::{AudioBuffer, AudioFormat, SampleFormat};
use crate::error::{FormatField, WavError};

/// hound header matching `format`
pub fn wav_spec(format: &AudioFormat) -> hound::WavSpec {
    hound::WavSpec {
        channels: format.channels(),
        sample_rate: format.sample_rate(),
        bits_per_sample: format.bits_per_sample(),
        sample_format: hound::SampleFormat::Int,
    }
}

/// Read the PCM payload of `path`, rejecting files not recorded in `expected`.
///
/// 8-bit payloads come back as their unsigned on-disk bytes, wider ones as
/// little-endian signed samples.
pub fn read_wav(path: &Path, expected: &AudioFormat) -> Result<AudioBuffer, WavError> {
    let mut reader = hound::WavReader::open(path).map_err(|e| match e {
        hound::Error::IoError(source) => WavError::Io {
            path: path.to_path_buf(),
            source,
        },
        other => WavError::Malformed {
            path: path.to_path_buf(),
            reason: other.to_string(),
        },
    })?;

    let spec = reader.spec();
    let mismatch = |field, found: String, expected: String| WavError::FormatMismatch {
        path: path.to_path_buf(),
        field,
        found,
        expected,
    };

    if spec.sample_rate != expected.sample_rate() {
        return Err(mismatch(
            FormatField::SampleRate,
            format!("{} Hz", spec.sample_rate),
            format!("{} Hz", expected.sample_rate()),
        ));
    }
    if spec.bits_per_sample != expected.bits_per_sample() {
        return Err(mismatch(
            FormatField::BitsPerSample,
            format!("{}-bit", spec.bits_per_sample),
            format!("{}-bit", expected.bits_per_sample()),
        ));
    }
    if spec.channels != expected.channels() {
        return Err(mismatch(
            FormatField::Channels,
            spec.channels.to_string(),
            expected.channels().to_string(),
        ));
    }
    if spec.sample_format != hound::SampleFormat::Int {
        return Err(mismatch(
            FormatField::SampleFormat,
            "float".to_string(),
            "integer PCM".to_string(),
        ));
    }

    let malformed = |e: hound::Error| WavError::Malformed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let mut data = Vec::with_capacity(reader.len() as usize * expected.sample_format().bytes());
    match expected.sample_format() {
        SampleFormat::U8 => {
            for sample in reader.samples::<i8>() {
                // hound hands out 8-bit samples re-centred on zero
                data.push((sample.map_err(malformed)? as u8) ^ 0x80);
            }
        }
        SampleFormat::I8 => {
            for sample in reader.samples::<i8>() {
                data.push(sample.map_err(malformed)? as u8);
            }
        }
        SampleFormat::I16 => {
            for sample in reader.samples::<i16>() {
                data.extend_from_slice(&sample.map_err(malformed)?.to_le_bytes());
            }
        }
        SampleFormat::I32 => {
            for sample in reader.samples::<i32>() {
                data.extend_from_slice(&sample.map_err(malformed)?.to_le_bytes());
            }
        }
    }

    tracing::info!("Read {} bytes from {}", data.len(), path.display());
    Ok(AudioBuffer::new(*expected, data))
}

/// Test helpers for producing WAV fixtures
#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Write `pcm` (already in wire encoding) as a WAV file in `format`
    pub fn write_pcm(path: &Path, format: &AudioFormat, pcm: &[u8]) {
        let mut writer = hound::WavWriter::create(path, wav_spec(format)).unwrap();
        match format.sample_format() {
            SampleFormat::U8 => {
                for &b in pcm {
                    writer.write_sample((b ^ 0x80) as i8).unwrap();
                }
            }
            SampleFormat::I16 => {
                for pair in pcm.chunks_exact(2) {
                    writer
                        .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                        .unwrap();
                }
            }
            other => panic!("fixture format {:?} not needed", other),
        }
        writer.finalize().unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::write_pcm;
    use super::*;

    fn u8_mono() -> AudioFormat {
        AudioFormat::new(16000, 8, 1).unwrap()
    }

    #[test]
    fn test_reads_u8_payload_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.wav");
        let pcm: Vec<u8> = (0..1000).map(|i| (i % 256) as u8).collect();
        write_pcm(&path, &u8_mono(), &pcm);

        let buffer = read_wav(&path, &u8_mono()).unwrap();
        assert_eq!(buffer.data(), &pcm[..]);
        assert_eq!(buffer.format(), &u8_mono());
    }

    #[test]
    fn test_reads_s16_stereo_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let format = AudioFormat::new(44100, 16, 2).unwrap();
        let pcm: Vec<u8> = [-2i16, 300, i16::MIN, i16::MAX]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        write_pcm(&path, &format, &pcm);

        let buffer = read_wav(&path, &format).unwrap();
        assert_eq!(buffer.data(), &pcm[..]);
    }

    #[test]
    fn test_rejects_each_mismatched_field() {
        let dir = tempfile::tempdir().unwrap();
        let cases = [
            (AudioFormat::new(22050, 8, 1).unwrap(), FormatField::SampleRate),
            (AudioFormat::new(16000, 16, 1).unwrap(), FormatField::BitsPerSample),
            (AudioFormat::new(16000, 8, 2).unwrap(), FormatField::Channels),
        ];
        for (i, (recorded, field)) in cases.iter().enumerate() {
            let path = dir.path().join(format!("bad{}.wav", i));
            write_pcm(&path, recorded, &vec![0u8; 64]);

            match read_wav(&path, &u8_mono()) {
                Err(WavError::FormatMismatch { field: f, .. }) => assert_eq!(f, *field),
                other => panic!("expected mismatch on {}, got {:?}", field, other),
            }
        }
    }

    #[test]
    fn test_rejects_float_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("float.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        writer.write_sample(0.5f32).unwrap();
        writer.finalize().unwrap();

        let expected = AudioFormat::new(16000, 16, 1).unwrap();
        let err = read_wav(&path, &expected).unwrap_err();
        assert!(err.is_format_mismatch());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_wav(&dir.path().join("nope.wav"), &u8_mono()).unwrap_err();
        assert!(matches!(err, WavError::Io { .. }));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.wav");
        std::fs::write(&path, b"definitely not a riff container").unwrap();
        let err = read_wav(&path, &u8_mono()).unwrap_err();
        assert!(matches!(err, WavError::Malformed { .. }));
    }
}

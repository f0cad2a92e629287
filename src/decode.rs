//! Capture-log decoder
//!
//! Converts text logs of captured float audio back into PCM. One chunk per
//! line:
//!
//! ```text
//! start_timestamp,end_timestamp,sample_count,base64(f32 little-endian samples)
//! ```
//!
//! Blank lines and lines starting with `#` are ignored. A bad line is
//! logged and skipped; it never ends the run.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::io::BufRead;

use crate::audio::format::{AudioFormat, SampleFormat};
use crate::audio::playback::PcmSink;
use crate::error::{DecodeError, Result};

/// One parsed log line
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedChunk {
    pub start: String,
    pub end: String,
    /// Sample count claimed by the line; may disagree with the payload
    pub declared_samples: usize,
    pub samples: Vec<f32>,
}

impl EncodedChunk {
    pub fn count_matches(&self) -> bool {
        self.declared_samples == self.samples.len()
    }
}

/// Parse one line. `Ok(None)` for blank and comment lines.
pub fn parse_line(line: &str) -> std::result::Result<Option<EncodedChunk>, DecodeError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() < 4 {
        return Err(DecodeError::FieldCount(parts.len()));
    }

    let declared_samples = parts[2]
        .trim()
        .parse::<usize>()
        .map_err(|_| DecodeError::SampleCount(parts[2].to_string()))?;

    let payload = STANDARD.decode(parts[3].trim())?;
    if payload.len() % 4 != 0 {
        return Err(DecodeError::PayloadLength(payload.len()));
    }
    let samples = payload
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    Ok(Some(EncodedChunk {
        start: parts[0].to_string(),
        end: parts[1].to_string(),
        declared_samples,
        samples,
    }))
}

/// Clip and convert float samples to PCM
pub fn convert(samples: &[f32], sample_format: SampleFormat) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * sample_format.bytes());
    for &s in samples {
        sample_format.push_f32(s, &mut out);
    }
    out
}

/// Totals for a decoded log
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecodeSummary {
    pub chunks: usize,
    pub samples: usize,
    pub skipped: usize,
}

/// Decode every line of `reader` and feed the PCM to each sink.
///
/// Parse failures skip the line. A failing sink or unreadable input ends
/// the run with an error. Every sink is finished before returning.
pub fn decode_lines<R: BufRead>(
    reader: R,
    format: &AudioFormat,
    sinks: &mut [Box<dyn PcmSink>],
) -> Result<DecodeSummary> {
    let mut summary = DecodeSummary::default();
    let outcome = decode_into(reader, format, sinks, &mut summary);

    let mut finished = Ok(());
    for sink in sinks.iter_mut() {
        if let Err(e) = sink.finish() {
            tracing::error!("Failed to finish output: {}", e);
            finished = Err(e);
        }
    }
    outcome?;
    finished?;

    tracing::info!("Processing complete.");
    tracing::info!("Total chunks: {}", summary.chunks);
    tracing::info!("Total samples: {}", summary.samples);
    let frames = summary.samples / format.channels() as usize;
    tracing::info!(
        "Audio duration: {:.2} seconds",
        frames as f64 / format.sample_rate() as f64
    );
    if summary.skipped > 0 {
        tracing::warn!("Skipped {} lines", summary.skipped);
    }
    Ok(summary)
}

fn decode_into<R: BufRead>(
    reader: R,
    format: &AudioFormat,
    sinks: &mut [Box<dyn PcmSink>],
    summary: &mut DecodeSummary,
) -> Result<()> {
    for (index, line) in reader.lines().enumerate() {
        let line_num = index + 1;
        let line = line?;

        let chunk = match parse_line(&line) {
            Ok(Some(chunk)) => chunk,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("Line {}: {}", line_num, e);
                summary.skipped += 1;
                continue;
            }
        };

        if !chunk.count_matches() {
            tracing::warn!(
                "Line {}: Sample count mismatch. Expected {}, got {}",
                line_num,
                chunk.declared_samples,
                chunk.samples.len()
            );
        }
        tracing::info!(
            "Chunk {}: {} to {}, {} samples",
            line_num,
            chunk.start,
            chunk.end,
            chunk.samples.len()
        );
        if !chunk.samples.is_empty() {
            let (min, max, sum) = chunk.samples.iter().fold(
                (f32::INFINITY, f32::NEG_INFINITY, 0.0f64),
                |(min, max, sum), &s| (min.min(s), max.max(s), sum + s as f64),
            );
            tracing::debug!(
                "  Float range: {:.6} to {:.6}, Average: {:.6}",
                min,
                max,
                sum / chunk.samples.len() as f64
            );
        }

        let pcm = convert(&chunk.samples, format.sample_format());
        for sink in sinks.iter_mut() {
            sink.write(&pcm)?;
        }

        summary.samples += chunk.samples.len();
        summary.chunks += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AudioError;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    fn encode(samples: &[f32]) -> String {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        STANDARD.encode(bytes)
    }

    /// Sink whose contents stay visible after it is boxed
    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<(Vec<u8>, bool)>>);

    impl PcmSink for SharedSink {
        fn write(&mut self, pcm: &[u8]) -> std::result::Result<(), AudioError> {
            self.0.lock().unwrap().0.extend_from_slice(pcm);
            Ok(())
        }

        fn finish(&mut self) -> std::result::Result<(), AudioError> {
            self.0.lock().unwrap().1 = true;
            Ok(())
        }
    }

    #[test]
    fn test_parse_line() {
        let line = format!("10.0,10.5,3,{}", encode(&[0.0, 0.5, -0.5]));
        let chunk = parse_line(&line).unwrap().unwrap();
        assert_eq!(chunk.start, "10.0");
        assert_eq!(chunk.end, "10.5");
        assert_eq!(chunk.samples, vec![0.0, 0.5, -0.5]);
        assert!(chunk.count_matches());
    }

    #[test]
    fn test_blank_and_comment_lines_ignored() {
        assert!(parse_line("").unwrap().is_none());
        assert!(parse_line("   ").unwrap().is_none());
        assert!(parse_line("# start,end,n,data").unwrap().is_none());
    }

    #[test]
    fn test_malformed_lines() {
        assert!(matches!(parse_line("1,2,3"), Err(DecodeError::FieldCount(3))));
        assert!(matches!(
            parse_line("1,2,many,AAAA"),
            Err(DecodeError::SampleCount(_))
        ));
        assert!(matches!(parse_line("1,2,1,@@@@"), Err(DecodeError::Base64(_))));
        // Six bytes is not a whole number of floats
        assert!(matches!(
            parse_line("1,2,1,AAAAAAAA"),
            Err(DecodeError::PayloadLength(6))
        ));
    }

    #[test]
    fn test_sixteen_bit_conversion_clips_and_truncates() {
        let pcm = convert(&[0.0, 1.0, -1.0, 2.0, -3.0, 0.5], SampleFormat::I16);
        let values: Vec<i16> = pcm
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(values, vec![0, 32767, -32767, 32767, -32767, 16383]);
    }

    #[test]
    fn test_eight_bit_conversion() {
        let pcm = convert(&[0.0, 1.0, -1.0, 0.5], SampleFormat::U8);
        assert_eq!(pcm, vec![127, 255, 0, 191]);
    }

    #[test]
    fn test_decode_lines_skips_bad_and_keeps_mismatched() {
        let input = format!(
            "# capture log\n\n0,1,2,{}\nbroken line\n1,2,5,{}\n",
            encode(&[0.0, 1.0]),
            encode(&[-1.0])
        );
        let format = AudioFormat::new(16000, 16, 1).unwrap();
        let shared = SharedSink::default();
        let mut sinks: Vec<Box<dyn PcmSink>> = vec![Box::new(shared.clone())];

        let summary = decode_lines(Cursor::new(input), &format, &mut sinks).unwrap();
        assert_eq!(
            summary,
            DecodeSummary {
                chunks: 2,
                samples: 3,
                skipped: 1
            }
        );

        let (data, finished) = shared.0.lock().unwrap().clone();
        assert!(finished);
        let values: Vec<i16> = data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(values, vec![0, 32767, -32767]);
    }

    #[test]
    fn test_decode_to_wav_file() {
        use crate::audio::playback::WavFileSink;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decoded.wav");
        let format = AudioFormat::new(8000, 8, 1).unwrap();
        let input = format!("0,1,4,{}\n", encode(&[0.0, 0.5, -0.5, 1.0]));
        let mut sinks: Vec<Box<dyn PcmSink>> =
            vec![Box::new(WavFileSink::create(&path, format).unwrap())];

        decode_lines(Cursor::new(input), &format, &mut sinks).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().bits_per_sample, 8);
        assert_eq!(reader.spec().sample_rate, 8000);
        // hound reads 8-bit WAV as signed, offset by 128
        let samples: Vec<u8> = reader
            .samples::<i8>()
            .map(|s| (s.unwrap() as u8) ^ 0x80)
            .collect();
        assert_eq!(samples, vec![127, 191, 63, 255]);
    }
}

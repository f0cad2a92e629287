//! PCM sinks: a local output device or a WAV file
//!
//! Both accept raw wire PCM in arbitrarily sized pieces; a sample split
//! across two socket reads is carried over to the next write.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::buffer::{create_shared_ring, SharedSampleRing};
use crate::audio::device::find_output_device;
use crate::audio::format::{AudioFormat, SampleFormat};
use crate::audio::wav::wav_spec;
use crate::error::AudioError;

/// Audio held between the socket and the device callback
const PLAYBACK_RING_MS: u32 = 500;

/// Upper bound on waiting for queued audio to play out on finish
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Destination for received PCM
pub trait PcmSink {
    /// Consume raw PCM bytes, blocking while the sink is full
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError>;

    /// Flush and release the sink. Called once at orderly stream end.
    fn finish(&mut self) -> Result<(), AudioError> {
        Ok(())
    }
}

/// Collects raw PCM in memory
impl PcmSink for Vec<u8> {
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
        self.extend_from_slice(pcm);
        Ok(())
    }
}

/// Splits a byte stream into whole samples, keeping any partial tail
#[derive(Debug)]
pub struct SampleCarry {
    sample_bytes: usize,
    carry: Vec<u8>,
}

impl SampleCarry {
    pub fn new(sample_format: SampleFormat) -> Self {
        Self {
            sample_bytes: sample_format.bytes(),
            carry: Vec::new(),
        }
    }

    /// Call `each` for every complete sample in `carry + bytes`
    pub fn feed(&mut self, bytes: &[u8], mut each: impl FnMut(&[u8])) {
        self.carry.extend_from_slice(bytes);
        let whole = self.carry.len() / self.sample_bytes * self.sample_bytes;
        for sample in self.carry[..whole].chunks_exact(self.sample_bytes) {
            each(sample);
        }
        self.carry.drain(..whole);
    }

    pub fn pending(&self) -> usize {
        self.carry.len()
    }
}

/// Plays PCM on an output device
pub struct DevicePlayback {
    format: AudioFormat,
    ring: SharedSampleRing,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Receiver<AudioError>,
    carry: SampleCarry,
    scratch: Vec<f32>,
}

impl DevicePlayback {
    /// Open the output device (default when `device_name` is `None`) and start playing
    pub fn open(device_name: Option<&str>, format: AudioFormat) -> Result<Self, AudioError> {
        let device = find_output_device(device_name)?;
        let device_label = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let config = StreamConfig {
            channels: format.channels(),
            sample_rate: cpal::SampleRate(format.sample_rate()),
            buffer_size: cpal::BufferSize::Default,
        };

        let ring_samples =
            format.frames_for_ms(PLAYBACK_RING_MS) as usize * format.channels() as usize;
        let ring = create_shared_ring(ring_samples);
        tracing::debug!("Playback ring holds {} samples", ring.capacity());
        let ring_for_cb = ring.clone();

        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();

        let handle = thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || {
                let stream = device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        ring_for_cb.fill(data);
                    },
                    move |err| {
                        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(AudioError::Closed);
            }
        }

        tracing::info!("Playing audio on {}: {}", device_label, format);

        Ok(Self {
            format,
            ring,
            running,
            thread_handle: Some(handle),
            error_rx,
            carry: SampleCarry::new(format.sample_format()),
            scratch: Vec::new(),
        })
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    fn check_device(&self) -> Result<(), AudioError> {
        if let Ok(err) = self.error_rx.try_recv() {
            return Err(err);
        }
        if self.thread_handle.as_ref().map_or(true, |h| h.is_finished()) {
            return Err(AudioError::Closed);
        }
        Ok(())
    }

    /// Stop the stream and release the device
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!(
                "Playback stopped; {} samples of underrun, {} left unplayed",
                self.ring.underrun_count(),
                self.ring.len()
            );
        }
    }
}

impl PcmSink for DevicePlayback {
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
        self.check_device()?;

        let sample_format = self.format.sample_format();
        let scratch = &mut self.scratch;
        scratch.clear();
        self.carry
            .feed(pcm, |sample| scratch.push(sample_format.to_f32(sample)));

        // Block until the device has room, like a blocking device write
        let mut offset = 0;
        while offset < self.scratch.len() {
            offset += self.ring.push_slice(&self.scratch[offset..]);
            if offset < self.scratch.len() {
                self.check_device()?;
                thread::sleep(Duration::from_millis(2));
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), AudioError> {
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        while !self.ring.is_empty() && Instant::now() < deadline {
            self.check_device()?;
            thread::sleep(Duration::from_millis(5));
        }
        self.stop();
        Ok(())
    }
}

impl Drop for DevicePlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Dumps PCM into a WAV file
pub struct WavFileSink {
    path: PathBuf,
    format: AudioFormat,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    carry: SampleCarry,
}

impl WavFileSink {
    pub fn create(path: &Path, format: AudioFormat) -> Result<Self, AudioError> {
        let writer = hound::WavWriter::create(path, wav_spec(&format))
            .map_err(|e| Self::sink_error(path, e))?;
        tracing::info!("Writing audio to {} ({})", path.display(), format);
        Ok(Self {
            path: path.to_path_buf(),
            format,
            writer: Some(writer),
            carry: SampleCarry::new(format.sample_format()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sink_error(path: &Path, e: hound::Error) -> AudioError {
        AudioError::FileSink {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    }
}

impl PcmSink for WavFileSink {
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(AudioError::Closed);
        };
        let sample_format = self.format.sample_format();
        let mut result = Ok(());
        self.carry.feed(pcm, |s| {
            if result.is_err() {
                return;
            }
            result = match sample_format {
                SampleFormat::U8 => writer.write_sample((s[0] ^ 0x80) as i8),
                SampleFormat::I8 => writer.write_sample(s[0] as i8),
                SampleFormat::I16 => writer.write_sample(i16::from_le_bytes([s[0], s[1]])),
                SampleFormat::I32 => {
                    writer.write_sample(i32::from_le_bytes([s[0], s[1], s[2], s[3]]))
                }
            };
        });
        result.map_err(|e| Self::sink_error(&self.path, e))
    }

    fn finish(&mut self) -> Result<(), AudioError> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| Self::sink_error(&self.path, e))?;
            tracing::info!("Saved WAV file: {}", self.path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::read_wav;

    #[test]
    fn test_carry_keeps_partial_samples() {
        let mut carry = SampleCarry::new(SampleFormat::I16);
        let mut seen = Vec::new();
        carry.feed(&[1, 2, 3], |s| seen.push(s.to_vec()));
        assert_eq!(seen, vec![vec![1, 2]]);
        assert_eq!(carry.pending(), 1);

        carry.feed(&[4, 5], |s| seen.push(s.to_vec()));
        assert_eq!(seen, vec![vec![1, 2], vec![3, 4]]);
        assert_eq!(carry.pending(), 1);
    }

    #[test]
    fn test_wav_sink_round_trips_through_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.wav");
        let format = AudioFormat::new(16000, 16, 1).unwrap();
        let pcm: Vec<u8> = [0i16, 1000, -1000, 7]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();

        let mut sink = WavFileSink::create(&path, format).unwrap();
        // Split mid-sample on purpose
        sink.write(&pcm[..3]).unwrap();
        sink.write(&pcm[3..]).unwrap();
        sink.finish().unwrap();
        assert!(matches!(sink.write(&pcm), Err(AudioError::Closed)));

        let buffer = read_wav(&path, &format).unwrap();
        assert_eq!(buffer.data(), &pcm[..]);
    }

    #[test]
    fn test_wav_sink_u8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump8.wav");
        let format = AudioFormat::new(8000, 8, 2).unwrap();
        let pcm = vec![0u8, 128, 255, 17];

        let mut sink = WavFileSink::create(&path, format).unwrap();
        sink.write(&pcm).unwrap();
        sink.finish().unwrap();

        assert_eq!(read_wav(&path, &format).unwrap().data(), &pcm[..]);
    }

    #[test]
    fn test_device_playback_when_available() {
        let format = AudioFormat::new(48000, 16, 2).unwrap();
        // Skips silently on machines without an output device
        if let Ok(mut playback) = DevicePlayback::open(None, format) {
            let _ = playback.write(&vec![0u8; 1920]);
            let _ = playback.finish();
            assert_eq!(playback.format(), &format);
        }
    }
}

//! Live audio capture from an input device
//!
//! The cpal stream lives on its own thread (streams are not `Send` on every
//! host). Its callback encodes samples into wire PCM and hands them over a
//! bounded channel; [`MicCapture::read_chunk`] reassembles them into
//! fixed-size chunks for the broadcaster.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::find_input_device;
use crate::audio::format::AudioFormat;
use crate::error::AudioError;

/// Callback buffers queued between the device and the reader
const CAPTURE_QUEUE_DEPTH: usize = 64;

/// How long a read waits for the device before reporting a timeout
const CAPTURE_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// A blocking source of fixed-size PCM chunks
pub trait CaptureSource: Send {
    /// Block until the next chunk is available
    fn read_chunk(&mut self) -> Result<Vec<u8>, AudioError>;

    /// Format of the produced chunks
    fn format(&self) -> &AudioFormat;
}

/// Encode device samples into wire PCM for `format`
pub fn encode_samples(format: &AudioFormat, samples: &[f32]) -> Vec<u8> {
    let sample_format = format.sample_format();
    let mut out = Vec::with_capacity(samples.len() * sample_format.bytes());
    for &sample in samples {
        sample_format.push_f32(sample, &mut out);
    }
    out
}

/// Regroups arbitrarily sized byte runs into chunks of one fixed size
#[derive(Debug)]
pub struct ChunkAssembler {
    chunk_bytes: usize,
    pending: Vec<u8>,
}

impl ChunkAssembler {
    pub fn new(chunk_bytes: usize) -> Self {
        Self {
            chunk_bytes,
            pending: Vec::with_capacity(chunk_bytes * 2),
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Take one full chunk if enough bytes are buffered
    pub fn next_chunk(&mut self) -> Option<Vec<u8>> {
        if self.pending.len() < self.chunk_bytes {
            return None;
        }
        let rest = self.pending.split_off(self.chunk_bytes);
        Some(std::mem::replace(&mut self.pending, rest))
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

/// Microphone capture producing `chunk_frames`-frame chunks
pub struct MicCapture {
    format: AudioFormat,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    data_rx: Receiver<Vec<u8>>,
    error_rx: Receiver<AudioError>,
    assembler: ChunkAssembler,
    /// Callback buffers dropped because the reader fell behind
    overflows: Arc<AtomicU64>,
}

impl MicCapture {
    /// Open the input device and start capturing immediately
    pub fn open(
        device_name: Option<&str>,
        format: AudioFormat,
        chunk_frames: u32,
    ) -> Result<Self, AudioError> {
        let device = find_input_device(device_name)?;
        let device_label = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let config = StreamConfig {
            channels: format.channels(),
            sample_rate: cpal::SampleRate(format.sample_rate()),
            buffer_size: cpal::BufferSize::Default,
        };

        let (data_tx, data_rx) = bounded::<Vec<u8>>(CAPTURE_QUEUE_DEPTH);
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();
        let overflows = Arc::new(AtomicU64::new(0));
        let overflows_cb = overflows.clone();

        let handle = thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let stream = device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        // A full queue is an overflow: drop the buffer, never block the device
                        if data_tx.try_send(encode_samples(&format, data)).is_err() {
                            overflows_cb.fetch_add(1, Ordering::Relaxed);
                        }
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
                // Stream is dropped here, releasing the device
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

        tracing::info!("Microphone stream started on {} ({})", device_label, format);

        Ok(Self {
            format,
            running,
            thread_handle: Some(handle),
            data_rx,
            error_rx,
            assembler: ChunkAssembler::new(chunk_frames as usize * format.bytes_per_sample()),
            overflows,
        })
    }

    /// Stop capturing and release the device
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!(
                "Microphone stopped; {} capture buffers dropped",
                self.overflows.load(Ordering::Relaxed)
            );
            tracing::debug!(
                "Discarding {} bytes of partial chunk",
                self.assembler.buffered()
            );
        }
    }
}

impl CaptureSource for MicCapture {
    fn read_chunk(&mut self) -> Result<Vec<u8>, AudioError> {
        loop {
            if let Some(chunk) = self.assembler.next_chunk() {
                return Ok(chunk);
            }
            if let Ok(err) = self.error_rx.try_recv() {
                return Err(err);
            }
            match self.data_rx.recv_timeout(CAPTURE_READ_TIMEOUT) {
                Ok(bytes) => self.assembler.push(&bytes),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(AudioError::CaptureTimeout(
                        CAPTURE_READ_TIMEOUT.as_millis() as u64,
                    ))
                }
                Err(RecvTimeoutError::Disconnected) => return Err(AudioError::Closed),
            }
        }
    }

    fn format(&self) -> &AudioFormat {
        &self.format
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembler_regroups() {
        let mut assembler = ChunkAssembler::new(4);
        assembler.push(&[1, 2, 3]);
        assert!(assembler.next_chunk().is_none());

        assembler.push(&[4, 5, 6, 7, 8, 9]);
        assert_eq!(assembler.next_chunk(), Some(vec![1, 2, 3, 4]));
        assert_eq!(assembler.next_chunk(), Some(vec![5, 6, 7, 8]));
        assert!(assembler.next_chunk().is_none());
        assert_eq!(assembler.buffered(), 1);
    }

    #[test]
    fn test_encode_samples_s16() {
        let format = AudioFormat::from_sample_width(44100, 2, 1).unwrap();
        let bytes = encode_samples(&format, &[0.0, 1.0, -1.0]);
        assert_eq!(bytes.len(), 6);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), 32767);
        assert_eq!(i16::from_le_bytes([bytes[4], bytes[5]]), -32767);
    }

    #[test]
    fn test_capture_opens_when_device_present() {
        // Only meaningful on machines with a microphone
        let format = AudioFormat::from_sample_width(44100, 2, 1).unwrap();
        if let Ok(mut capture) = MicCapture::open(None, format, 1024) {
            assert_eq!(capture.format(), &format);
            capture.stop();
        }
    }
}

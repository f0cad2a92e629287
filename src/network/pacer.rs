//! Real-time paced transmission
//!
//! A buffer is written in fixed-size chunks. After each chunk the pacer
//! compares how long the bytes sent so far take to play against the time
//! elapsed since the first chunk, and sleeps off any lead. When the writer
//! falls behind it carries on immediately: nothing is dropped and there is
//! no catching up. The clock is tokio's monotonic [`Instant`].

use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::{sleep_until, Instant};

use crate::audio::format::AudioFormat;
use crate::error::NetworkError;

/// Outcome of pacing one buffer
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PaceReport {
    pub bytes_sent: usize,
    pub chunks: usize,
    /// Largest amount the writer trailed the real-time schedule
    pub max_lag: Duration,
}

/// Chunked writer limited to `bytes_per_sec`
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    chunk_size: usize,
    bytes_per_sec: u64,
}

impl Pacer {
    pub fn new(chunk_size: usize, bytes_per_sec: u64) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            bytes_per_sec: bytes_per_sec.max(1),
        }
    }

    /// Pacer running at the real-time rate of `format`
    pub fn for_format(format: &AudioFormat, chunk_size: usize) -> Self {
        Self::new(chunk_size, format.bytes_per_sec())
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn bytes_per_sec(&self) -> u64 {
        self.bytes_per_sec
    }

    /// Playback time of `bytes` at this rate
    pub fn expected_elapsed(&self, bytes: usize) -> Duration {
        let nanos = bytes as u128 * 1_000_000_000 / self.bytes_per_sec as u128;
        Duration::from_nanos(nanos as u64)
    }

    /// Write all of `data` to `sink` at real-time rate.
    ///
    /// Any write failure ends the whole buffer with
    /// [`NetworkError::Disconnected`]; the caller must stop using the sink.
    pub async fn send<W>(&self, sink: &mut W, data: &[u8]) -> Result<PaceReport, NetworkError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut report = PaceReport::default();
        let start = Instant::now();

        for chunk in data.chunks(self.chunk_size) {
            sink.write_all(chunk)
                .await
                .map_err(NetworkError::Disconnected)?;
            sink.flush().await.map_err(NetworkError::Disconnected)?;
            report.bytes_sent += chunk.len();
            report.chunks += 1;

            let target = start + self.expected_elapsed(report.bytes_sent);
            let now = Instant::now();
            if target > now {
                sleep_until(target).await;
            } else {
                report.max_lag = report.max_lag.max(now - target);
            }
        }

        if !report.max_lag.is_zero() {
            tracing::trace!("Fell behind schedule by up to {:?}", report.max_lag);
        }
        Ok(report)
    }
}

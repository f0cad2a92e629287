//! Streaming client
//!
//! Connects to either server, optionally reads the microphone header, and
//! copies everything it receives into a [`PcmSink`] until the server closes
//! the connection or the caller asks it to stop.

use std::io::{self, Read};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::audio::format::AudioFormat;
use crate::audio::playback::{DevicePlayback, PcmSink, WavFileSink};
use crate::config::ClientConfig;
use crate::error::{Error, NetworkError, Result};
use crate::protocol::{StreamHeader, HEADER_LEN};

/// Socket read timeout; bounds how long a stop request goes unnoticed
const STOP_POLL: Duration = Duration::from_millis(200);

/// What a finished receive loop saw
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveReport {
    pub bytes: u64,
    pub reads: u64,
    /// Ended by the caller rather than by the server
    pub stopped: bool,
}

/// Copy `src` into `sink` in reads of up to `buffer_size` bytes.
///
/// A zero-length read is the server closing the stream and ends the loop
/// normally. Read timeouts only re-check `stop`. The sink is finished on
/// every exit path so a partially written file stays readable.
pub fn receive_loop<R, S>(
    src: &mut R,
    sink: &mut S,
    buffer_size: usize,
    stop: &AtomicBool,
) -> Result<ReceiveReport>
where
    R: Read + ?Sized,
    S: PcmSink + ?Sized,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut report = ReceiveReport::default();

    let outcome = loop {
        if stop.load(Ordering::SeqCst) {
            report.stopped = true;
            break Ok(());
        }
        match src.read(&mut buf) {
            Ok(0) => {
                tracing::info!("Server closed connection");
                break Ok(());
            }
            Ok(n) => {
                report.bytes += n as u64;
                report.reads += 1;
                if let Err(e) = sink.write(&buf[..n]) {
                    break Err(Error::from(e));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                continue
            }
            Err(e) => break Err(NetworkError::ReceiveFailed(e).into()),
        }
    };

    let finished = sink.finish();
    outcome?;
    finished?;
    tracing::debug!("Received {} bytes in {} reads", report.bytes, report.reads);
    Ok(report)
}

/// Read and validate the 12-byte microphone header
pub fn read_header<R: Read + ?Sized>(src: &mut R) -> std::result::Result<StreamHeader, NetworkError> {
    let mut raw = [0u8; HEADER_LEN];
    src.read_exact(&mut raw).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            NetworkError::InvalidHeader("connection closed before header".to_string())
        }
        _ => NetworkError::ReceiveFailed(e),
    })?;
    StreamHeader::decode(&raw)
}

/// Open a TCP connection to `addr`
pub fn connect(addr: &str) -> std::result::Result<TcpStream, NetworkError> {
    TcpStream::connect(addr).map_err(|source| NetworkError::ConnectionFailed {
        addr: addr.to_string(),
        source,
    })
}

fn open_sink(config: &ClientConfig, format: AudioFormat) -> Result<Box<dyn PcmSink>> {
    match &config.output {
        Some(path) => Ok(Box::new(WavFileSink::create(path, format)?)),
        None => Ok(Box::new(DevicePlayback::open(config.device.as_deref(), format)?)),
    }
}

/// Connect and play (or record) until the server hangs up or `stop` is set
pub fn play_until(config: &ClientConfig, stop: &AtomicBool) -> Result<ReceiveReport> {
    config.validate()?;
    let addr = config.server_address();
    let mut stream = connect(&addr)?;
    tracing::info!("Connected to server at {}", addr);

    let (format, read_size) = if config.header {
        let header = read_header(&mut stream)?;
        tracing::info!(
            "Stream header: {} Hz, {}-byte samples, {} frames per chunk",
            header.sample_rate,
            header.sample_width,
            header.chunk_frames
        );
        (header.audio_format()?, header.chunk_bytes())
    } else {
        let format = config.format()?;
        tracing::warn!(
            "Raw stream carries no format; assuming {}. Must match the server.",
            format
        );
        (format, config.buffer_size)
    };

    stream
        .set_read_timeout(Some(STOP_POLL))
        .map_err(NetworkError::ReceiveFailed)?;

    let mut sink = open_sink(config, format)?;
    tracing::info!("Receiving {} (read size {} bytes)", format, read_size);
    let report = receive_loop(&mut stream, sink.as_mut(), read_size, stop)?;

    let _ = stream.shutdown(std::net::Shutdown::Both);
    tracing::info!("Connection closed.");
    Ok(report)
}

/// Connect and play until the server hangs up
pub fn play(config: &ClientConfig) -> Result<ReceiveReport> {
    play_until(config, &AtomicBool::new(false))
}

//! Error types for the PCM streaming application

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("WAV error: {0}")]
    Wav(#[from] WavError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio device errors (capture and playback)
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("No audio captured for {0} ms")]
    CaptureTimeout(u64),

    #[error("Device stream closed")]
    Closed,

    #[error("Failed to write {}: {reason}", path.display())]
    FileSink { path: PathBuf, reason: String },
}

/// Which container field failed format validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatField {
    SampleRate,
    BitsPerSample,
    Channels,
    SampleFormat,
}

impl std::fmt::Display for FormatField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FormatField::SampleRate => "sample rate",
            FormatField::BitsPerSample => "bit depth",
            FormatField::Channels => "channel count",
            FormatField::SampleFormat => "sample format",
        };
        f.write_str(name)
    }
}

/// Per-file WAV errors; the caller skips the file and moves on
#[derive(Error, Debug)]
pub enum WavError {
    #[error("{}: cannot read file: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: malformed WAV container: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("{}: incorrect {field} ({found}), expected {expected}", path.display())]
    FormatMismatch {
        path: PathBuf,
        field: FormatField,
        found: String,
        expected: String,
    },
}

impl WavError {
    /// True when the file was readable but recorded in the wrong format
    pub fn is_format_mismatch(&self) -> bool {
        matches!(self, WavError::FormatMismatch { .. })
    }
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed on {addr}: {reason}")]
    BindFailed { addr: String, reason: String },

    #[error("Connection to {addr} failed: {source}")]
    ConnectionFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Peer disconnected: {0}")]
    Disconnected(#[source] std::io::Error),

    #[error("Receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    #[error("Invalid stream header: {0}")]
    InvalidHeader(String),
}

/// Startup configuration errors. Always fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unsupported bit depth: {0} (use 8 or 16)")]
    UnsupportedBitDepth(u16),

    #[error("Unsupported sample width: {0} bytes (use 1, 2 or 4)")]
    UnsupportedSampleWidth(u32),

    #[error("Unsupported channel count: {0} (use 1 or 2)")]
    UnsupportedChannels(u16),

    #[error("Sample rate must be positive")]
    InvalidSampleRate,

    #[error("Buffer size must be positive, got {0}")]
    InvalidBufferSize(usize),

    #[error("Chunk of {0} ms holds no complete sample at this rate")]
    InvalidChunkDuration(u32),

    #[error("Chunk size must be positive")]
    InvalidChunkFrames,

    #[error("Audio directory is not set")]
    MissingAudioDir,

    #[error("'{}' exists but is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("Failed creating audio dir '{}': {source}", path.display())]
    AudioDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load config file {}: {reason}", path.display())]
    File { path: PathBuf, reason: String },
}

/// Capture-log decoding errors
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Invalid format (expected 4 parts, got {0})")]
    FieldCount(usize),

    #[error("Invalid sample count: {0}")]
    SampleCount(String),

    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Payload length {0} is not a multiple of 4 bytes")]
    PayloadLength(usize),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;

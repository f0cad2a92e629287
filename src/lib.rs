//! # LAN PCM Streamer
//!
//! Real-time paced PCM audio over plain TCP.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────── WAV SERVER ─────────────────────────────┐
//! │  audio dir ──► Playlist (per connection, reshuffled every pass)     │
//! │                   │                                                 │
//! │                   ▼                                                 │
//! │             WAV Reader ──► Pacer ──► socket  ◄── one task per client│
//! │             Silence ─────►   │                                      │
//! └──────────────────────────────┼──────────────────────────────────────┘
//!                                │ raw PCM, no header
//! ┌──────────────────────── MICROPHONE SERVER ──────────────────────────┐
//! │  Mic capture thread ──► chunk ──► ClientRegistry ──► N sockets      │
//! │  Accept thread ──► 12-byte header ──► register                      │
//! └──────────────────────────────┼──────────────────────────────────────┘
//!                                │ header + raw PCM
//!                                ▼
//! ┌────────────────────────────── CLIENT ───────────────────────────────┐
//! │  socket ──► receive loop ──► PcmSink (output device | WAV file)     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The raw WAV stream carries no format information: server and client must
//! be started with the same `--sample-rate`, `--bits` and `--channels`. A
//! mismatch plays as noise rather than failing.

pub mod audio;
pub mod config;
pub mod decode;
pub mod error;
pub mod network;
pub mod protocol;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Default TCP port of the WAV streaming server
    pub const DEFAULT_PORT: u16 = 65432;

    /// Default TCP port of the microphone server
    pub const DEFAULT_MIC_PORT: u16 = 5555;

    /// Default sample rate of the WAV stream
    pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

    /// Default bit depth of the WAV stream (unsigned 8-bit)
    pub const DEFAULT_BITS: u16 = 8;

    /// Default channel count (mono)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Default paced chunk duration in milliseconds
    pub const DEFAULT_CHUNK_MS: u32 = 20;

    /// Default silence between files in milliseconds
    pub const DEFAULT_SILENCE_MS: u32 = 10;

    /// Default client socket read size in bytes
    pub const DEFAULT_BUFFER_SIZE: usize = 1024;

    /// Microphone defaults
    pub const DEFAULT_MIC_SAMPLE_RATE: u32 = 44100;
    pub const DEFAULT_MIC_SAMPLE_WIDTH: u32 = 2;
    pub const DEFAULT_MIC_CHUNK_FRAMES: u32 = 1024;

    /// Microphone clients whose socket stays full this long are dropped
    pub const DEFAULT_CLIENT_WRITE_TIMEOUT_MS: u64 = 2000;

    /// Chunks queued per microphone client before it counts as stalled
    pub const CLIENT_QUEUE_CHUNKS: usize = 32;

    /// Wait before re-checking a playlist with nothing playable
    pub const IDLE_RETRY: Duration = Duration::from_secs(1);

    /// Backoff after a failed capture read
    pub const CAPTURE_RETRY: Duration = Duration::from_millis(100);

    /// Backoff after a failed accept
    pub const ACCEPT_RETRY: Duration = Duration::from_millis(100);

    /// How often the blocking accept loop checks the running flag
    pub const ACCEPT_POLL: Duration = Duration::from_millis(50);
}

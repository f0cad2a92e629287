//! Application configuration
//!
//! Every binary reads an optional TOML file with one section per role and
//! then applies its command-line flags on top:
//!
//! ```toml
//! [server]
//! audio_dir = "/srv/audio"
//! bits = 16
//!
//! [client]
//! buffer_size = 2048
//!
//! [mic]
//! sample_width = 2
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::format::AudioFormat;
use crate::constants::*;
use crate::error::ConfigError;
use crate::protocol::StreamHeader;

/// Root of the configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub mic: MicServerConfig,
}

impl AppConfig {
    /// Parse a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::File {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::File {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Per-user config file location, e.g. `~/.config/lan-pcm-streamer/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "lan-pcm-streamer")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load `explicit` if given, else the per-user file if it exists, else defaults
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => {
                tracing::info!("Using config file {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }
}

/// WAV playlist server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub audio_dir: Option<PathBuf>,
    pub sample_rate: u32,
    pub bits: u16,
    pub channels: u16,
    /// Duration of one paced chunk
    pub chunk_ms: u32,
    /// Silence inserted after every file
    pub silence_ms: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            audio_dir: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            bits: DEFAULT_BITS,
            channels: DEFAULT_CHANNELS,
            chunk_ms: DEFAULT_CHUNK_MS,
            silence_ms: DEFAULT_SILENCE_MS,
        }
    }
}

impl ServerConfig {
    pub fn format(&self) -> Result<AudioFormat, ConfigError> {
        AudioFormat::new(self.sample_rate, self.bits, self.channels)
    }

    /// Bytes per paced chunk; never zero for a validated config
    pub fn chunk_size_bytes(&self) -> Result<usize, ConfigError> {
        let bytes = self.format()?.bytes_for_ms(self.chunk_ms);
        if bytes == 0 {
            return Err(ConfigError::InvalidChunkDuration(self.chunk_ms));
        }
        Ok(bytes)
    }

    pub fn audio_dir(&self) -> Result<&Path, ConfigError> {
        self.audio_dir.as_deref().ok_or(ConfigError::MissingAudioDir)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunk_size_bytes()?;
        self.audio_dir()?;
        Ok(())
    }

    /// Make sure the audio directory exists, creating it when missing
    pub fn prepare_audio_dir(&self) -> Result<PathBuf, ConfigError> {
        let dir = self.audio_dir()?;
        if !dir.exists() {
            tracing::warn!("Audio dir '{}' not found, creating it", dir.display());
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::AudioDir {
                path: dir.to_path_buf(),
                source,
            })?;
            tracing::info!("Created audio directory: '{}'", dir.display());
        }
        if !dir.is_dir() {
            return Err(ConfigError::NotADirectory(dir.to_path_buf()));
        }
        Ok(dir.to_path_buf())
    }
}

/// Player client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub sample_rate: u32,
    pub bits: u16,
    pub channels: u16,
    /// Bytes requested per socket read
    pub buffer_size: usize,
    /// Read the microphone header instead of using the flags above
    pub header: bool,
    /// Output device name; host default when unset
    pub device: Option<String>,
    /// Write a WAV file instead of playing
    pub output: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            sample_rate: DEFAULT_SAMPLE_RATE,
            bits: DEFAULT_BITS,
            channels: DEFAULT_CHANNELS,
            buffer_size: DEFAULT_BUFFER_SIZE,
            header: false,
            device: None,
            output: None,
        }
    }
}

impl ClientConfig {
    pub fn format(&self) -> Result<AudioFormat, ConfigError> {
        AudioFormat::new(self.sample_rate, self.bits, self.channels)
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidBufferSize(self.buffer_size));
        }
        if !self.header {
            self.format()?;
        }
        Ok(())
    }
}

/// Microphone broadcast server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MicServerConfig {
    pub host: String,
    pub port: u16,
    pub sample_rate: u32,
    /// Bytes per sample: 1, 2 or 4
    pub sample_width: u32,
    /// Frames per broadcast chunk
    pub chunk_frames: u32,
    /// Input device name; host default when unset
    pub device: Option<String>,
    /// Clients whose socket stays full this long are dropped
    pub write_timeout_ms: u64,
}

impl Default for MicServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_MIC_PORT,
            sample_rate: DEFAULT_MIC_SAMPLE_RATE,
            sample_width: DEFAULT_MIC_SAMPLE_WIDTH,
            chunk_frames: DEFAULT_MIC_CHUNK_FRAMES,
            device: None,
            write_timeout_ms: DEFAULT_CLIENT_WRITE_TIMEOUT_MS,
        }
    }
}

impl MicServerConfig {
    pub fn format(&self) -> Result<AudioFormat, ConfigError> {
        AudioFormat::from_sample_width(self.sample_rate, self.sample_width, 1)
    }

    pub fn header(&self) -> StreamHeader {
        StreamHeader {
            sample_rate: self.sample_rate,
            sample_width: self.sample_width,
            chunk_frames: self.chunk_frames,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        (self.write_timeout_ms > 0).then(|| Duration::from_millis(self.write_timeout_ms))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.format()?;
        if self.chunk_frames == 0 {
            return Err(ConfigError::InvalidChunkFrames);
        }
        Ok(())
    }
}

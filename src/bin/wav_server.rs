//! WAV Streaming Server
//!
//! Streams every WAV file in a directory to each TCP client in real time,
//! reshuffled on every pass, with a short silence between files.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_pcm_streamer::{config::AppConfig, network::WavServer};

#[derive(Parser, Debug)]
#[command(name = "wav-server")]
#[command(about = "Stream a directory of WAV files as raw PCM over TCP")]
struct Args {
    /// Interface to bind
    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// Directory containing WAV files
    #[arg(long)]
    audio_dir: Option<PathBuf>,

    #[arg(long)]
    sample_rate: Option<u32>,

    /// Bits per sample (8 or 16)
    #[arg(long)]
    bits: Option<u16>,

    /// Channels (1 or 2)
    #[arg(long)]
    channels: Option<u16>,

    /// Duration of each paced chunk in milliseconds
    #[arg(long)]
    chunk_ms: Option<u32>,

    /// Silence between files in milliseconds
    #[arg(long)]
    silence_ms: Option<u32>,

    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = AppConfig::resolve(args.config.as_deref())?.server;

    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(dir) = args.audio_dir {
        config.audio_dir = Some(dir);
    }
    if let Some(rate) = args.sample_rate {
        config.sample_rate = rate;
    }
    if let Some(bits) = args.bits {
        config.bits = bits;
    }
    if let Some(channels) = args.channels {
        config.channels = channels;
    }
    if let Some(ms) = args.chunk_ms {
        config.chunk_ms = ms;
    }
    if let Some(ms) = args.silence_ms {
        config.silence_ms = ms;
    }

    let server = match WavServer::new(config) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            return Err(e.into());
        }
    };

    server.run().await?;
    Ok(())
}

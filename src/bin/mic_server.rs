//! Microphone Broadcast Server
//!
//! Captures the microphone and sends the same PCM chunks to every connected
//! client, each preceded by a 12-byte format header.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_pcm_streamer::{
    audio::{list_devices, print_devices, MicCapture},
    config::AppConfig,
    network::MicServer,
};

#[derive(Parser, Debug)]
#[command(name = "mic-server")]
#[command(about = "Broadcast live microphone audio over TCP")]
struct Args {
    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    sample_rate: Option<u32>,

    /// Bytes per sample (1, 2 or 4)
    #[arg(long)]
    sample_width: Option<u32>,

    /// Frames per broadcast chunk
    #[arg(long)]
    chunk_frames: Option<u32>,

    /// Input device name (default device when omitted)
    #[arg(long)]
    device: Option<String>,

    /// Print audio devices and exit
    #[arg(long)]
    list_devices: bool,

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
    if args.list_devices {
        print_devices(&list_devices());
        return Ok(());
    }

    let mut config = AppConfig::resolve(args.config.as_deref())?.mic;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(rate) = args.sample_rate {
        config.sample_rate = rate;
    }
    if let Some(width) = args.sample_width {
        config.sample_width = width;
    }
    if let Some(frames) = args.chunk_frames {
        config.chunk_frames = frames;
    }
    if args.device.is_some() {
        config.device = args.device;
    }

    let server = MicServer::new(config.clone())?;
    let listener = server.bind()?;
    let capture = MicCapture::open(config.device.as_deref(), config.format()?, config.chunk_frames)
        .context("failed to open microphone")?;

    let mut handle = server.start(capture, listener)?;
    tracing::info!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    tokio::task::spawn_blocking(move || handle.stop()).await?;
    Ok(())
}

//! Streaming Client
//!
//! Plays a PCM stream from the WAV server or the microphone server, or
//! records it to a WAV file with `--output`.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_pcm_streamer::{
    audio::{list_devices, print_devices},
    config::AppConfig,
    network::client::play_until,
};

#[derive(Parser, Debug)]
#[command(name = "client")]
#[command(about = "Receive and play a PCM audio stream")]
struct Args {
    /// Server host
    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// Sample rate of the raw stream
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Bits per sample of the raw stream (8 or 16)
    #[arg(long)]
    bits: Option<u16>,

    /// Channels of the raw stream (1 or 2)
    #[arg(long)]
    channels: Option<u16>,

    /// Bytes per socket read
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Expect the microphone server's format header
    #[arg(long)]
    header: bool,

    /// Record to this WAV file instead of playing
    #[arg(long)]
    output: Option<PathBuf>,

    /// Output device name (default device when omitted)
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

    let mut config = AppConfig::resolve(args.config.as_deref())?.client;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
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
    if let Some(size) = args.buffer_size {
        config.buffer_size = size;
    }
    if args.header {
        config.header = true;
    }
    if args.output.is_some() {
        config.output = args.output;
    }
    if args.device.is_some() {
        config.device = args.device;
    }

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Stopping client");
                stop.store(true, Ordering::SeqCst);
            }
        });
    }

    let result = tokio::task::spawn_blocking(move || play_until(&config, &stop)).await?;

    match result {
        Ok(report) => {
            tracing::info!("Received {} bytes", report.bytes);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Error: {}", e);
            Err(e.into())
        }
    }
}

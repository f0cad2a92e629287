//! Capture-log decoder
//!
//! Turns a log of base64-encoded float32 chunks back into a WAV file and/or
//! plays it.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_pcm_streamer::{
    audio::{AudioFormat, DevicePlayback, PcmSink, WavFileSink},
    decode::decode_lines,
};

#[derive(Parser, Debug)]
#[command(name = "pcm-decode")]
#[command(about = "Decode base64 float32 audio logs to WAV")]
struct Args {
    /// Input file with one encoded chunk per line
    input: PathBuf,

    /// Output WAV file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output bit depth (8 or 16)
    #[arg(short = 'b', long, default_value_t = 16)]
    output_bit_depth: u16,

    #[arg(short = 'r', long, default_value_t = 16000)]
    sample_rate: u32,

    #[arg(short, long, default_value_t = 1)]
    channels: u16,

    /// Play while decoding
    #[arg(short, long)]
    play: bool,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let format = AudioFormat::new(args.sample_rate, args.output_bit_depth, args.channels)?;

    let output = match args.output {
        Some(path) => Some(path),
        None if !args.play => {
            let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            Some(PathBuf::from(format!("decoded_audio_{}.wav", stamp)))
        }
        None => None,
    };

    let mut sinks: Vec<Box<dyn PcmSink>> = Vec::new();
    if let Some(path) = &output {
        sinks.push(Box::new(WavFileSink::create(path, format)?));
    }
    if args.play {
        sinks.push(Box::new(DevicePlayback::open(None, format)?));
    }

    let input = File::open(&args.input)
        .with_context(|| format!("cannot open {}", args.input.display()))?;
    let summary = decode_lines(BufReader::new(input), &format, &mut sinks)?;

    if let Some(path) = output {
        tracing::info!("Wrote {} chunks to {}", summary.chunks, path.display());
    }
    Ok(())
}

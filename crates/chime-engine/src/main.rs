//! # Chime
//!
//! Command-line player for the Chime engine: loads WAVE files that match the
//! configured device format and plays each of them once on the default output
//! device.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chime_engine::config::EngineConfig;
use chime_engine::rodio_backend::RodioBackend;
use chime_kernel::{AudioEngine, ManualBackend, SoundAsset};
use clap::Parser;
use rodio::OutputStream;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "chime", version)]
#[command(about = "Plays short PCM sounds over a fixed channel pool", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Only check that the files load, without opening an audio device
    #[arg(long)]
    check: bool,

    /// WAVE files to play
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

/// Main entry point.
fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load_from(path),
        None => EngineConfig::load(),
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)))
        .init();

    info!("Chime {} starting", env!("CARGO_PKG_VERSION"));

    if cli.check {
        check_files(&config, &cli.files)
    } else {
        play_files(&config, &cli.files)
    }
}

/// Loads every file against the device format and reports the result.
fn check_files(config: &EngineConfig, files: &[PathBuf]) -> Result<()> {
    let engine = AudioEngine::new(ManualBackend::new(), config.engine_settings().with_channel_count(1))?;

    let mut failed = 0;
    for path in files {
        match engine.load_asset_file(path) {
            Ok(asset) => println!(
                "{}: ok, {} bytes, {:.3}s",
                path.display(),
                asset.byte_length(),
                asset.duration().as_secs_f64()
            ),
            Err(e) => {
                println!("{}: {e}", path.display());
                failed += 1;
            },
        }
    }

    if failed > 0 {
        bail!("{failed} of {} file(s) cannot be played", files.len());
    }
    Ok(())
}

/// Plays every loadable file once and waits for playback to finish.
fn play_files(config: &EngineConfig, files: &[PathBuf]) -> Result<()> {
    let (_stream, handle) = OutputStream::try_default().context("failed to open audio output")?;
    let backend = RodioBackend::new(handle)?;
    let engine = AudioEngine::new(backend, config.engine_settings())?;

    let assets: Vec<SoundAsset<RodioBackend>> = files
        .iter()
        .filter_map(|path| {
            engine
                .load_asset_file(path)
                .map_err(|e| warn!("Skipping: {e}"))
                .ok()
        })
        .collect();

    if assets.is_empty() {
        bail!("none of the {} file(s) could be loaded", files.len());
    }

    for asset in &assets {
        match asset.play()? {
            Some(channel) => info!("{} playing on {}", asset.id(), channel),
            None => warn!("All {} channels busy, {} not played", engine.capacity(), asset.id()),
        }
    }

    engine.wait_idle();
    drop(assets);

    info!("Chime shutdown complete");
    Ok(())
}

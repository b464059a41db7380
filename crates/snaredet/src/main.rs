//! Snare Detector - microphone hit detection streamed over WebSocket
//!
//! This is the command-line entry point. It resolves configuration, sets up
//! logging and runs the capture, detection and broadcast stages until
//! interrupted. With `--input` it analyses WAV files instead and exits.

#![warn(missing_docs)]

mod app;
mod cli;
mod config;
mod logging_setup;

use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use tracing::{error, info};

use crate::cli::Cli;
use crate::config::AppConfig;

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.list_devices {
        return app::list_devices();
    }

    let config = AppConfig::from_cli(&cli)?;
    config.validate().context("Invalid configuration")?;

    let _log_guard = logging_setup::init(&config.logging)?;

    if let Some(input) = &cli.input {
        return app::analyze_files(&config, input).map_err(|e| {
            error!("{:#}", e);
            e
        });
    }

    info!("==========================================");
    info!("===   Snare Detector Session Started   ===");
    info!("==========================================");
    info!(
        "Audio: device={}, {} Hz, {} ms frames",
        config.audio.device.as_deref().unwrap_or("default"),
        config.audio.sample_rate,
        config.audio.frame_duration_ms
    );
    info!(
        "Detector: threshold={}, decay={}, refractory={}, measure={:?}, gaps={:?}",
        config.detector.threshold,
        config.detector.decay,
        config
            .detector
            .refractory_ms
            .map(|ms| format!("{} ms", ms))
            .unwrap_or_else(|| "none".to_string()),
        config.detector.measure,
        config.detector.gap_policy
    );
    if config.preprocess.enabled {
        info!(
            "Pre-processing: band-pass {}-{} Hz, median window {}",
            config.preprocess.bandpass_low_hz,
            config.preprocess.bandpass_high_hz,
            config.preprocess.median_window
        );
    }

    let duration = cli.duration.map(Duration::from_secs);
    match app::run(config, duration) {
        Ok(summary) => {
            info!("Stopped after {} hit(s)", summary.hits);
            Ok(())
        }
        Err(e) => {
            error!("{:#}", e);
            Err(e)
        }
    }
}

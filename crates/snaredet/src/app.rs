//! Runtime wiring
//!
//! The capture stream lives on the main thread, detection runs on its own
//! OS thread, and the WebSocket server plus broadcaster run on a tokio
//! runtime. The only link from detection to the network is the bounded hit
//! channel.

use anyhow::{anyhow, bail, Context, Result};
use snaredet_control::broadcaster::DEFAULT_HIT_CHANNEL_CAPACITY;
use snaredet_control::{hit_channel, Broadcaster, ConnectionRegistry, WebServer};
use snaredet_core::{
    AudioSource, CpalBackend, DetectionLoop, HitDetector, HitEvent, LoopOutcome, LoopSummary,
    StopHandle, WavSource,
};
use std::future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::AppConfig;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Print every input device to stdout
pub fn list_devices() -> Result<()> {
    let devices = CpalBackend::list_devices().context("Failed to enumerate audio devices")?;
    if devices.is_empty() {
        println!("No audio input devices found.");
        return Ok(());
    }

    println!("Available audio input devices:");
    for device in devices {
        println!(
            "  [{}] {}{}  ({} ch, {} Hz)",
            device.index,
            device.name,
            if device.is_default { " (default)" } else { "" },
            device.channels,
            device.default_sample_rate
        );
    }
    Ok(())
}

/// Run until Ctrl-C, `duration` elapsing, or the audio input failing.
///
/// Returns an error if the device could not be opened or was lost.
pub fn run(config: AppConfig, duration: Option<Duration>) -> Result<LoopSummary> {
    // The device comes first: without it no hit can ever be produced.
    let (backend, source) =
        CpalBackend::open(&config.audio).context("Failed to open audio input")?;
    let detector = HitDetector::with_preprocessor(
        config.detector.clone(),
        &config.preprocess,
        backend.sample_rate(),
    )
    .context("Invalid detector settings for this device")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("snare-net")
        .build()
        .context("Failed to start async runtime")?;

    let registry = ConnectionRegistry::new(config.server.client_queue_depth);
    let broadcaster = Broadcaster::new(registry.clone());
    let (hits, hits_rx) = hit_channel(DEFAULT_HIT_CHANNEL_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = runtime
        .block_on(WebServer::bind(
            config.server.clone(),
            registry,
            broadcaster.stats(),
        ))
        .context("Failed to start WebSocket server")?;
    info!("Clients connect to ws://{}", server.local_addr());

    let server_task = runtime.spawn(server.serve(shutdown_rx.clone()));
    let broadcaster_task = runtime.spawn(broadcaster.run(hits_rx, shutdown_rx));

    let stop = StopHandle::new();
    let detection = DetectionLoop::new(source, detector, hits)
        .with_stop_handle(stop.clone())
        .spawn()
        .context("Failed to start detection thread")?;

    runtime.block_on(async {
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let deadline = async {
            match duration {
                Some(limit) => tokio::time::sleep(limit).await,
                None => future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);
        let mut poll = tokio::time::interval(Duration::from_millis(100));

        loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Interrupted, shutting down");
                    break;
                }
                _ = &mut deadline => {
                    info!("Run time elapsed, shutting down");
                    break;
                }
                _ = poll.tick() => {
                    if detection.is_finished() {
                        break;
                    }
                }
            }
        }
    });

    stop.stop();
    let summary = detection
        .join()
        .map_err(|_| anyhow!("Detection thread panicked"))?;
    // Closes the capture device.
    drop(backend);

    let _ = shutdown_tx.send(true);
    runtime.block_on(async {
        match tokio::time::timeout(SHUTDOWN_GRACE, server_task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!("WebSocket server ended with error: {}", e),
            Ok(Err(e)) => warn!("WebSocket server task failed: {}", e),
            Err(_) => warn!("WebSocket server did not stop in time"),
        }
        if tokio::time::timeout(SHUTDOWN_GRACE, broadcaster_task)
            .await
            .is_err()
        {
            warn!("Broadcaster did not stop in time");
        }
    });
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    info!(
        "Session ended: {} hit(s) in {} frame(s), {} gap(s) ({} frame(s) lost), {} hit(s) not delivered",
        summary.hits, summary.frames, summary.gaps, summary.missing_frames, summary.hits_dropped
    );

    if let LoopOutcome::Failed(e) = summary.outcome {
        return Err(anyhow::Error::new(e).context("Audio input lost, detection stopped"));
    }
    Ok(summary)
}

/// Offline analysis of one WAV file or a directory of them.
///
/// Hits are printed to stdout per file. A file that cannot be read is
/// logged and skipped; the call fails at the end if any file did.
pub fn analyze_files(config: &AppConfig, input: &Path) -> Result<()> {
    let files = wav_files(input)?;
    if files.is_empty() {
        bail!("No .wav files found in {}", input.display());
    }

    let mut failed = 0usize;
    for path in &files {
        match analyze_file(config, path) {
            Ok(hits) => print_hits(path, &hits),
            Err(e) => {
                error!("{}: {:#}", path.display(), e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} file(s) could not be analysed", failed, files.len());
    }
    Ok(())
}

/// `input` itself, or the `.wav` files directly inside it, sorted by name
fn wav_files(input: &Path) -> Result<Vec<PathBuf>> {
    if !input.is_dir() {
        return Ok(vec![input.to_path_buf()]);
    }

    let entries = std::fs::read_dir(input)
        .with_context(|| format!("Failed to read directory {}", input.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_wav = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
        if is_wav && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Run the detection loop over one file on the calling thread
fn analyze_file(config: &AppConfig, path: &Path) -> Result<Vec<HitEvent>> {
    let source = WavSource::open(path, config.audio.frame_duration_ms)?;
    info!(
        "Analysing {} ({:.2} s at {} Hz)",
        path.display(),
        source.duration().as_secs_f64(),
        source.sample_rate()
    );
    let detector = HitDetector::with_preprocessor(
        config.detector.clone(),
        &config.preprocess,
        source.sample_rate(),
    )
    .context("Invalid detector settings for this file")?;

    let (tx, rx) = crossbeam_channel::unbounded();
    let summary = DetectionLoop::new(source, detector, tx).run();
    if let LoopOutcome::Failed(e) = summary.outcome {
        return Err(e.into());
    }
    Ok(rx.try_iter().collect())
}

fn print_hits(path: &Path, hits: &[HitEvent]) {
    println!("{}: {} hit(s)", path.display(), hits.len());
    for hit in hits {
        println!(
            "  #{:<4} {:>9.3} s  level {:.4}",
            hit.hit_number,
            hit.timestamp_ms as f64 / 1000.0,
            hit.rms_value
        );
    }
}

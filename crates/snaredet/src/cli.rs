//! Command-line interface

use clap::{ArgAction, Parser, ValueEnum};
use snaredet_core::{DetectorConfig, GapPolicy, LoudnessMeasure};
use std::path::PathBuf;

use crate::config::AppConfig;

/// Detector profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Profile {
    /// Fixed threshold with a 150 ms lockout after every hit
    Fixed,
    /// Threshold and decay only; re-arms as soon as the envelope falls
    Configurable,
}

/// Per-frame loudness measure
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MeasureArg {
    Rms,
    Peak,
}

impl From<MeasureArg> for LoudnessMeasure {
    fn from(arg: MeasureArg) -> Self {
        match arg {
            MeasureArg::Rms => LoudnessMeasure::Rms,
            MeasureArg::Peak => LoudnessMeasure::Peak,
        }
    }
}

/// Meaning of dropped audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GapPolicyArg {
    /// Treat missing audio as silence
    Silence,
    /// Freeze detection across missing audio
    Hold,
}

impl From<GapPolicyArg> for GapPolicy {
    fn from(arg: GapPolicyArg) -> Self {
        match arg {
            GapPolicyArg::Silence => GapPolicy::Silence,
            GapPolicyArg::Hold => GapPolicy::Hold,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "snare-detector",
    version,
    about = "Detects snare drum hits from a microphone and streams them to WebSocket clients",
    after_help = "Examples:
  snare-detector --list-devices             List audio input devices
  snare-detector -d 2                       Use input device 2
  snare-detector -p 9000 --host 0.0.0.0     Listen on all interfaces, port 9000
  snare-detector --threshold 0.05           More sensitive detection
  snare-detector -t 60                      Stop after one minute
  snare-detector -i takes/ --filter         Report hits in every WAV file under takes/
  snare-detector --median 20 --decay 0.99   Band-pass, more smoothing, slower decay"
)]
pub struct Cli {
    /// TOML configuration file; flags override its values
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// List audio input devices and exit
    #[arg(short = 'l', long)]
    pub list_devices: bool,

    /// Input device index or name (default: system default)
    #[arg(short, long)]
    pub device: Option<String>,

    /// Capture sample rate in Hz
    #[arg(long)]
    pub sample_rate: Option<u32>,

    /// Frame length in milliseconds
    #[arg(long, value_name = "MS")]
    pub frame_ms: Option<u32>,

    /// WebSocket bind host
    #[arg(long)]
    pub host: Option<String>,

    /// WebSocket port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Detector profile (threshold and decay flags still apply on top)
    #[arg(long, value_enum)]
    pub profile: Option<Profile>,

    /// Envelope level that counts as a hit
    #[arg(long)]
    pub threshold: Option<f32>,

    /// Per-frame envelope decay, in [0, 1)
    #[arg(long)]
    pub decay: Option<f32>,

    /// Minimum time between hits in milliseconds
    #[arg(long, value_name = "MS")]
    pub refractory_ms: Option<u64>,

    /// Per-frame loudness measure
    #[arg(long, value_enum)]
    pub measure: Option<MeasureArg>,

    /// How dropped audio is treated
    #[arg(long, value_enum)]
    pub gap_policy: Option<GapPolicyArg>,

    /// Enable the band-pass pre-processing chain
    #[arg(long)]
    pub filter: bool,

    /// Band-pass low cutoff in Hz (enables the chain)
    #[arg(long, value_name = "HZ")]
    pub bandpass_low: Option<f32>,

    /// Band-pass high cutoff in Hz (enables the chain)
    #[arg(long, value_name = "HZ")]
    pub bandpass_high: Option<f32>,

    /// Median window over frame loudness (enables the chain)
    #[arg(long, value_name = "FRAMES")]
    pub median: Option<usize>,

    /// Decimate to about this rate before filtering (enables the chain)
    #[arg(long, value_name = "HZ")]
    pub downsample: Option<u32>,

    /// Stop after this many seconds
    #[arg(short = 't', long, value_name = "SECS")]
    pub duration: Option<u64>,

    /// Analyse a WAV file, or every .wav file in a directory, instead of
    /// listening to a device
    #[arg(short, long, value_name = "PATH", conflicts_with = "list_devices")]
    pub input: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Also log to a file
    #[arg(long)]
    pub log_file: bool,
}

impl Cli {
    /// Layer the flags over `config`
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(device) = &self.device {
            config.audio.device = Some(device.clone());
        }
        if let Some(rate) = self.sample_rate {
            config.audio.sample_rate = rate;
        }
        if let Some(ms) = self.frame_ms {
            config.audio.frame_duration_ms = ms;
        }

        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }

        if let Some(profile) = self.profile {
            let base = match profile {
                Profile::Fixed => DetectorConfig::fixed_threshold(),
                Profile::Configurable => DetectorConfig::default(),
            };
            config.detector = DetectorConfig {
                measure: config.detector.measure,
                gap_policy: config.detector.gap_policy,
                ..base
            };
        }
        if let Some(threshold) = self.threshold {
            config.detector.threshold = threshold;
        }
        if let Some(decay) = self.decay {
            config.detector.decay = decay;
        }
        if let Some(ms) = self.refractory_ms {
            config.detector.refractory_ms = Some(ms);
        }
        if let Some(measure) = self.measure {
            config.detector.measure = measure.into();
        }
        if let Some(policy) = self.gap_policy {
            config.detector.gap_policy = policy.into();
        }

        let preprocess = &mut config.preprocess;
        if let Some(low) = self.bandpass_low {
            preprocess.bandpass_low_hz = low;
        }
        if let Some(high) = self.bandpass_high {
            preprocess.bandpass_high_hz = high;
        }
        if let Some(window) = self.median {
            preprocess.median_window = window;
        }
        if let Some(rate) = self.downsample {
            preprocess.downsample_hz = Some(rate);
        }
        if self.filter
            || self.bandpass_low.is_some()
            || self.bandpass_high.is_some()
            || self.median.is_some()
            || self.downsample.is_some()
        {
            preprocess.enabled = true;
        }

        match self.verbose {
            0 => {}
            1 => config.logging.level = "debug".to_string(),
            _ => config.logging.level = "trace".to_string(),
        }
        if self.log_file {
            config.logging.file_output = true;
        }
    }
}

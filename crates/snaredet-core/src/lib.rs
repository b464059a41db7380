//! Snare Detector Core - Capture and Analysis
//!
//! This crate contains everything that runs on the analysis side of the
//! detector:
//! - Audio capture (device backend, fixed-size framing, WAV files, scripted sources)
//! - Loudness measurement and the attack/decay envelope
//! - The edge-triggered hit detector with refractory handling
//! - Optional band-limiting pre-processing
//! - The detection loop that feeds hits to a non-blocking sink
//!
//! Network fan-out lives in `snaredet-control`.

#![warn(missing_docs)]

use thiserror::Error;

pub mod audio;
pub mod detector;
pub mod logging;
pub mod pipeline;

// --- Re-exports grouped by category ---

// Audio capture
pub use audio::{AudioConfig, AudioFrame, AudioSource, SourceEvent, WavSource};
pub use audio::backend::{mock::ScriptedSource, AudioDeviceInfo};
#[cfg(feature = "audio")]
pub use audio::backend::cpal_backend::{CpalBackend, CpalSource};

// Detection
pub use detector::envelope::EnvelopeState;
pub use detector::loudness::LoudnessMeasure;
pub use detector::preprocess::{PreprocessConfig, Preprocessor};
pub use detector::{DetectorConfig, DetectorState, GapPolicy, HitDetector, HitEvent};

// Detection loop
pub use pipeline::{DetectionLoop, HitSink, LoopOutcome, LoopSummary, StopHandle};

// Logging
pub use logging::LogConfig;

/// Core error types
#[derive(Error, Debug)]
pub enum CoreError {
    /// A configuration value is out of range or inconsistent
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The requested input device does not exist
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// The device exists but a capture stream could not be opened
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The device went away while capturing
    #[error("Audio device disconnected: {0}")]
    DeviceDisconnected(String),

    /// The device only offers a sample format we cannot convert
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// An audio file is missing or not a readable WAV file
    #[error("Cannot read audio file: {0}")]
    AudioFile(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// True for errors that mean no further audio will ever arrive.
    pub fn is_device_error(&self) -> bool {
        matches!(
            self,
            CoreError::DeviceNotFound(_)
                | CoreError::DeviceUnavailable(_)
                | CoreError::DeviceDisconnected(_)
                | CoreError::UnsupportedFormat(_)
        )
    }
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Current wall-clock time as Unix epoch milliseconds.
pub fn unix_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

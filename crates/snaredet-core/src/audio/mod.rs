//! Audio capture
//!
//! An [`AudioSource`] yields a lazy, non-restartable sequence of
//! [`SourceEvent`]s. Complete frames arrive as [`SourceEvent::Frame`]; lost
//! audio is reported as [`SourceEvent::Gap`] and is never padded with zero
//! samples. Audio that is merely late is not lost: the source answers
//! [`SourceEvent::Pending`] and delivers it on a later call.

pub mod backend;
pub mod capture;
pub mod framer;
pub mod wav;

pub use capture::{capture_channel, CaptureQueue, CaptureSender, CapturedChunk};
pub use framer::Framer;
pub use wav::WavSource;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{CoreError, Result};

/// A block of mono PCM captured from the input device.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Position of this frame in the capture stream, starting at 0
    pub sequence: u64,
    /// Samples normalised to [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Acquisition time (Unix epoch milliseconds)
    pub timestamp_ms: i64,
}

impl AudioFrame {
    /// Create a frame stamped with the current time
    pub fn new(sequence: u64, samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::with_timestamp(sequence, samples, sample_rate, crate::unix_millis())
    }

    /// Create a frame with an explicit acquisition time
    pub fn with_timestamp(
        sequence: u64,
        samples: Vec<f32>,
        sample_rate: u32,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            sequence,
            samples,
            sample_rate,
            timestamp_ms,
        }
    }

    /// Number of samples in the frame
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True if the frame carries no samples
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Length of audio covered by this frame
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Something that happened on the capture stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    /// A complete frame
    Frame(AudioFrame),
    /// Audio that was captured but lost before analysis
    Gap {
        /// Whole frames lost
        missing_frames: u64,
    },
    /// Nothing new within the wait window; poll again
    Pending,
    /// A finite source has nothing more to deliver
    Ended,
}

/// Producer of fixed-size audio frames.
///
/// `next_event` must return within roughly two frame durations, reporting
/// [`SourceEvent::Pending`] when no complete frame arrived in time.
pub trait AudioSource: Send {
    /// Sample rate of delivered frames
    fn sample_rate(&self) -> u32;

    /// Samples per delivered frame
    fn frame_size(&self) -> usize;

    /// Wait for the next frame, gap, end of stream or an empty poll
    fn next_event(&mut self) -> Result<SourceEvent>;

    /// Duration covered by one frame
    fn frame_duration(&self) -> Duration {
        if self.sample_rate() == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_size() as f64 / self.sample_rate() as f64)
    }
}

impl<S: AudioSource + ?Sized> AudioSource for Box<S> {
    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn frame_size(&self) -> usize {
        (**self).frame_size()
    }

    fn next_event(&mut self) -> Result<SourceEvent> {
        (**self).next_event()
    }
}

/// Capture settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device index or name; `None` selects the host default
    pub device: Option<String>,
    /// Requested sample rate in Hz
    pub sample_rate: u32,
    /// Frame length in milliseconds
    pub frame_duration_ms: u32,
    /// Callback chunks buffered between the device and the analysis loop
    pub channel_capacity: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: 48_000,
            frame_duration_ms: 50,
            channel_capacity: 64,
        }
    }
}

impl AudioConfig {
    /// Samples per frame at the configured rate
    pub fn frame_size(&self) -> usize {
        frame_size_for(self.sample_rate, self.frame_duration_ms)
    }

    /// Frame length as a [`Duration`]
    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.frame_duration_ms as u64)
    }

    /// Check the settings before any device is opened
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(CoreError::InvalidConfig(
                "sample rate must be positive".to_string(),
            ));
        }
        if self.frame_duration_ms == 0 {
            return Err(CoreError::InvalidConfig(
                "frame duration must be positive".to_string(),
            ));
        }
        if self.frame_size() == 0 {
            return Err(CoreError::InvalidConfig(format!(
                "{} ms at {} Hz yields an empty frame",
                self.frame_duration_ms, self.sample_rate
            )));
        }
        if self.channel_capacity == 0 {
            return Err(CoreError::InvalidConfig(
                "capture channel capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Samples in a frame of `frame_duration_ms` at `sample_rate`.
pub fn frame_size_for(sample_rate: u32, frame_duration_ms: u32) -> usize {
    (sample_rate as u64 * frame_duration_ms as u64 / 1000) as usize
}

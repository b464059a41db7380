//! Envelope and hit detection
//!
//! A two-state machine driven once per frame. The detector is quiescent
//! until the envelope crosses above the threshold, which emits exactly one
//! [`HitEvent`] and enters the refractory state. It stays refractory until
//! the envelope has decayed back to the threshold or below (and the optional
//! minimum refractory time has passed). Continued ringing of the same strike
//! therefore never produces a second hit.

pub mod envelope;
pub mod loudness;
pub mod preprocess;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, trace};

use crate::audio::AudioFrame;
use crate::{CoreError, Result};
use envelope::EnvelopeState;
use loudness::LoudnessMeasure;
use preprocess::{PreprocessConfig, Preprocessor};

/// Minimum time between hits in the fixed-threshold profile
pub const FIXED_REFRACTORY_MS: u64 = 150;

/// What a gap in the audio stream means to the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapPolicy {
    /// Missing audio is silence: the envelope decays once per missing frame
    #[default]
    Silence,
    /// Missing audio is a measurement fault: envelope and state are frozen
    Hold,
}

/// Detector settings, fixed for the lifetime of a [`HitDetector`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Envelope level that qualifies as a hit
    pub threshold: f32,
    /// Per-frame multiplicative falloff, in [0, 1)
    pub decay: f32,
    /// Optional minimum time between hits
    pub refractory_ms: Option<u64>,
    /// Per-frame loudness measure
    pub measure: LoudnessMeasure,
    /// Interpretation of dropped audio
    pub gap_policy: GapPolicy,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold: 0.2,
            decay: 0.95,
            refractory_ms: None,
            measure: LoudnessMeasure::Rms,
            gap_policy: GapPolicy::Silence,
        }
    }
}

impl DetectorConfig {
    /// The fixed-threshold profile: default threshold and decay plus a
    /// 150 ms lockout after every hit.
    pub fn fixed_threshold() -> Self {
        Self {
            refractory_ms: Some(FIXED_REFRACTORY_MS),
            ..Self::default()
        }
    }

    /// Minimum refractory time, if any
    pub fn refractory(&self) -> Option<Duration> {
        self.refractory_ms.map(Duration::from_millis)
    }

    /// Reject settings that could never produce sane detection.
    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || self.threshold <= 0.0 {
            return Err(CoreError::InvalidConfig(format!(
                "threshold must be a positive number (got {})",
                self.threshold
            )));
        }
        // decay >= 1 would hold the envelope up forever and lock the
        // detector in refractory after the first hit.
        if !self.decay.is_finite() || !(0.0..1.0).contains(&self.decay) {
            return Err(CoreError::InvalidConfig(format!(
                "decay must be in [0, 1) (got {})",
                self.decay
            )));
        }
        Ok(())
    }
}

/// Where the detector is in its hit cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Below threshold, ready to trigger
    Quiescent,
    /// A hit was counted; ringing is being ignored
    Refractory {
        /// Stream time at which the hit was counted
        since: Duration,
    },
}

/// One accepted strike
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitEvent {
    /// Acquisition time of the frame that crossed (Unix epoch milliseconds)
    pub timestamp_ms: i64,
    /// 1 for the first hit, then +1 per hit
    pub hit_number: u64,
    /// Envelope value at the crossing
    pub rms_value: f32,
    /// Threshold in effect
    pub threshold: f32,
}

/// Edge-triggered hit detector.
///
/// Time is measured on the stream itself (the sum of processed frame
/// durations plus gaps), so results do not depend on how promptly frames
/// are delivered.
#[derive(Debug)]
pub struct HitDetector {
    config: DetectorConfig,
    envelope: EnvelopeState,
    state: DetectorState,
    hit_count: u64,
    clock: Duration,
    frame_duration: Duration,
    frames_processed: u64,
    preprocessor: Option<Preprocessor>,
}

impl HitDetector {
    /// Create a detector, rejecting invalid configuration
    pub fn new(config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        debug!(
            "Hit detector: threshold={}, decay={}, refractory={:?}, measure={:?}",
            config.threshold, config.decay, config.refractory_ms, config.measure
        );
        Ok(Self {
            envelope: EnvelopeState::new(config.decay),
            config,
            state: DetectorState::Quiescent,
            hit_count: 0,
            clock: Duration::ZERO,
            frame_duration: Duration::ZERO,
            frames_processed: 0,
            preprocessor: None,
        })
    }

    /// Create a detector that band-limits each frame before measuring it.
    ///
    /// A disabled `preprocess` config yields a plain detector.
    pub fn with_preprocessor(
        config: DetectorConfig,
        preprocess: &PreprocessConfig,
        sample_rate: u32,
    ) -> Result<Self> {
        let mut detector = Self::new(config)?;
        if preprocess.enabled {
            let chain = Preprocessor::new(preprocess, sample_rate)?;
            info!(
                "Pre-processing enabled: {}-{} Hz at {} Hz, median window {}",
                preprocess.bandpass_low_hz,
                preprocess.bandpass_high_hz,
                chain.output_rate(),
                preprocess.median_window
            );
            detector.preprocessor = Some(chain);
        }
        Ok(detector)
    }

    /// Feed one frame; returns the hit if this frame crossed the threshold.
    pub fn process_frame(&mut self, frame: &AudioFrame) -> Option<HitEvent> {
        let measure = self.config.measure;
        let instant = match self.preprocessor.as_mut() {
            Some(chain) => {
                let level = measure.measure(chain.filter(&frame.samples));
                chain.smooth(level)
            }
            None => measure.measure(&frame.samples),
        };

        let env = self.envelope.update(instant);
        self.frame_duration = frame.duration();
        self.clock += self.frame_duration;
        self.frames_processed += 1;
        trace!("frame {}: instant={:.4} env={:.4}", frame.sequence, instant, env);

        self.try_release();

        if self.state == DetectorState::Quiescent && env > self.config.threshold {
            self.hit_count += 1;
            self.state = DetectorState::Refractory { since: self.clock };
            let hit = HitEvent {
                timestamp_ms: frame.timestamp_ms,
                hit_number: self.hit_count,
                rms_value: env,
                threshold: self.config.threshold,
            };
            info!(
                "Hit #{} (envelope {:.4} > {:.4})",
                hit.hit_number, hit.rms_value, hit.threshold
            );
            return Some(hit);
        }

        None
    }

    /// Account for frames that never arrived. Never emits a hit.
    pub fn process_gap(&mut self, missing_frames: u64) {
        if missing_frames == 0 {
            return;
        }
        match self.config.gap_policy {
            GapPolicy::Silence => {
                self.envelope.decay_steps(missing_frames);
                self.clock += self
                    .frame_duration
                    .saturating_mul(missing_frames.min(u32::MAX as u64) as u32);
                self.try_release();
                debug!(
                    "Gap of {} frame(s) treated as silence, envelope {:.4}",
                    missing_frames,
                    self.envelope.value()
                );
            }
            GapPolicy::Hold => {
                debug!(
                    "Gap of {} frame(s) ignored, envelope held at {:.4}",
                    missing_frames,
                    self.envelope.value()
                );
            }
        }
    }

    fn try_release(&mut self) {
        if let DetectorState::Refractory { since } = self.state {
            let decayed = self.envelope.value() <= self.config.threshold;
            let elapsed = match self.config.refractory() {
                Some(min) => self.clock.saturating_sub(since) >= min,
                None => true,
            };
            if decayed && elapsed {
                trace!("Released after {:?}", self.clock.saturating_sub(since));
                self.state = DetectorState::Quiescent;
            }
        }
    }

    /// Hits emitted so far
    pub fn hit_count(&self) -> u64 {
        self.hit_count
    }

    /// Current envelope value
    pub fn envelope(&self) -> f32 {
        self.envelope.value()
    }

    /// Current state
    pub fn state(&self) -> DetectorState {
        self.state
    }

    /// Settings in effect
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Frames fed through [`process_frame`](Self::process_frame)
    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Stream time covered so far
    pub fn stream_time(&self) -> Duration {
        self.clock
    }
}

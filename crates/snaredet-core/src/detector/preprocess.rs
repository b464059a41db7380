//! Optional band-limiting ahead of the envelope.
//!
//! Snare energy sits mostly in a narrow low band, so isolating it makes the
//! detector far less sensitive to cymbals, speech and room noise. The chain
//! is decimation, then a biquad band-pass cascade, then loudness measurement,
//! then a streaming median over per-frame loudness. Every stage keeps its
//! state across frames.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::f32::consts::PI;

use crate::{CoreError, Result};

/// Pre-processing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Run the chain at all
    pub enabled: bool,
    /// Target rate for decimation; `None` keeps the capture rate
    pub downsample_hz: Option<u32>,
    /// Lower edge of the pass band
    pub bandpass_low_hz: f32,
    /// Upper edge of the pass band
    pub bandpass_high_hz: f32,
    /// Number of cascaded biquad sections
    pub order: usize,
    /// Median window over per-frame loudness (1 disables)
    pub median_window: usize,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            downsample_hz: Some(16_000),
            bandpass_low_hz: 80.0,
            bandpass_high_hz: 200.0,
            order: 2,
            median_window: 1,
        }
    }
}

impl PreprocessConfig {
    /// Check the settings; `sample_rate` is the capture rate when known.
    pub fn validate(&self, sample_rate: Option<u32>) -> Result<()> {
        if self.median_window == 0 {
            return Err(CoreError::InvalidConfig(
                "median window must be at least 1".to_string(),
            ));
        }
        if let Some(0) = self.downsample_hz {
            return Err(CoreError::InvalidConfig(
                "downsample rate must be positive".to_string(),
            ));
        }
        if !(self.bandpass_low_hz.is_finite() && self.bandpass_high_hz.is_finite())
            || self.bandpass_low_hz <= 0.0
            || self.bandpass_high_hz <= 0.0
        {
            return Err(CoreError::InvalidConfig(
                "band-pass frequencies must be positive".to_string(),
            ));
        }
        if self.bandpass_low_hz >= self.bandpass_high_hz {
            return Err(CoreError::InvalidConfig(format!(
                "low cutoff ({} Hz) must be below high cutoff ({} Hz)",
                self.bandpass_low_hz, self.bandpass_high_hz
            )));
        }
        if self.order == 0 {
            return Err(CoreError::InvalidConfig(
                "band-pass order must be at least 1".to_string(),
            ));
        }
        if let Some(rate) = sample_rate {
            let nyquist = self.output_rate(rate) as f32 / 2.0;
            if self.bandpass_high_hz >= nyquist {
                return Err(CoreError::InvalidConfig(format!(
                    "high cutoff ({} Hz) must be below Nyquist ({} Hz)",
                    self.bandpass_high_hz, nyquist
                )));
            }
        }
        Ok(())
    }

    /// Decimation factor applied to a `sample_rate` input
    pub fn decimation_factor(&self, sample_rate: u32) -> usize {
        match self.downsample_hz {
            Some(target) if target > 0 && target < sample_rate => {
                (sample_rate / target).max(1) as usize
            }
            _ => 1,
        }
    }

    /// Rate the band-pass runs at
    pub fn output_rate(&self, sample_rate: u32) -> u32 {
        sample_rate / self.decimation_factor(sample_rate) as u32
    }
}

/// Integer-factor decimator with a boxcar anti-alias average.
#[derive(Debug, Clone)]
pub struct Decimator {
    factor: usize,
    acc: f32,
    count: usize,
}

impl Decimator {
    /// `factor` of 1 passes samples through
    pub fn new(factor: usize) -> Self {
        Self {
            factor: factor.max(1),
            acc: 0.0,
            count: 0,
        }
    }

    /// Decimation factor
    pub fn factor(&self) -> usize {
        self.factor
    }

    /// Append the decimated form of `input` to `out`
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        if self.factor == 1 {
            out.extend_from_slice(input);
            return;
        }
        for &x in input {
            self.acc += x;
            self.count += 1;
            if self.count == self.factor {
                out.push(self.acc / self.factor as f32);
                self.acc = 0.0;
                self.count = 0;
            }
        }
    }

    /// Drop any partial block
    pub fn reset(&mut self) {
        self.acc = 0.0;
        self.count = 0;
    }
}

/// One biquad section, transposed direct form II.
#[derive(Debug, Clone, Copy)]
struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    z1: f32,
    z2: f32,
}

impl Biquad {
    /// Constant 0 dB peak gain band-pass (RBJ cookbook)
    fn band_pass(sample_rate: f32, center_hz: f32, q: f32) -> Self {
        let w0 = 2.0 * PI * center_hz / sample_rate;
        let alpha = w0.sin() / (2.0 * q);
        let a0 = 1.0 + alpha;
        Self {
            b0: alpha / a0,
            b1: 0.0,
            b2: -alpha / a0,
            a1: -2.0 * w0.cos() / a0,
            a2: (1.0 - alpha) / a0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }

    fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

/// Streaming band-pass built from identical cascaded biquads.
#[derive(Debug, Clone)]
pub struct BandpassFilter {
    sections: Vec<Biquad>,
}

impl BandpassFilter {
    /// Pass band `[low_hz, high_hz]` at `sample_rate`, `order` sections
    pub fn new(sample_rate: u32, low_hz: f32, high_hz: f32, order: usize) -> Self {
        let center = (low_hz * high_hz).sqrt();
        let q = center / (high_hz - low_hz);
        let section = Biquad::band_pass(sample_rate as f32, center, q);
        Self {
            sections: vec![section; order.max(1)],
        }
    }

    /// Filter `samples` in place
    pub fn process(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            let mut y = if sample.is_finite() { *sample } else { 0.0 };
            for section in &mut self.sections {
                y = section.process(y);
            }
            *sample = y;
        }
    }

    /// Clear filter memory
    pub fn reset(&mut self) {
        for section in &mut self.sections {
            section.reset();
        }
    }
}

/// Streaming median over the most recent `window` values.
#[derive(Debug, Clone)]
pub struct MedianFilter {
    window: usize,
    history: VecDeque<f32>,
    scratch: Vec<f32>,
}

impl MedianFilter {
    /// `window` of 1 passes values through
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            history: VecDeque::with_capacity(window),
            scratch: Vec::with_capacity(window),
        }
    }

    /// Window size
    pub fn window(&self) -> usize {
        self.window
    }

    /// Push a value and return the median of the current window
    pub fn push(&mut self, value: f32) -> f32 {
        if self.window == 1 {
            return value;
        }
        if self.history.len() == self.window {
            self.history.pop_front();
        }
        self.history.push_back(value);

        self.scratch.clear();
        self.scratch.extend(self.history.iter().copied());
        self.scratch.sort_by(|a, b| a.total_cmp(b));

        let n = self.scratch.len();
        if n % 2 == 1 {
            self.scratch[n / 2]
        } else {
            (self.scratch[n / 2 - 1] + self.scratch[n / 2]) / 2.0
        }
    }

    /// Forget history
    pub fn reset(&mut self) {
        self.history.clear();
    }
}

/// The full chain for one capture rate.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    decimator: Decimator,
    bandpass: BandpassFilter,
    median: MedianFilter,
    output_rate: u32,
    buffer: Vec<f32>,
}

impl Preprocessor {
    /// Build the chain for frames captured at `sample_rate`
    pub fn new(config: &PreprocessConfig, sample_rate: u32) -> Result<Self> {
        config.validate(Some(sample_rate))?;
        let factor = config.decimation_factor(sample_rate);
        let output_rate = config.output_rate(sample_rate);
        Ok(Self {
            decimator: Decimator::new(factor),
            bandpass: BandpassFilter::new(
                output_rate,
                config.bandpass_low_hz,
                config.bandpass_high_hz,
                config.order,
            ),
            median: MedianFilter::new(config.median_window),
            output_rate,
            buffer: Vec::new(),
        })
    }

    /// Rate of the filtered signal
    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Decimate and band-pass one frame
    pub fn filter(&mut self, samples: &[f32]) -> &[f32] {
        self.buffer.clear();
        self.decimator.process(samples, &mut self.buffer);
        self.bandpass.process(&mut self.buffer);
        &self.buffer
    }

    /// Median-smooth one per-frame loudness value
    pub fn smooth(&mut self, loudness: f32) -> f32 {
        self.median.push(loudness)
    }

    /// Clear every stage
    pub fn reset(&mut self) {
        self.decimator.reset();
        self.bandpass.reset();
        self.median.reset();
        self.buffer.clear();
    }
}

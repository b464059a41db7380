//! Instantaneous loudness of a frame.
//!
//! Non-finite samples are treated as silence so a single corrupt sample
//! cannot poison the envelope.

use serde::{Deserialize, Serialize};

/// How a frame is reduced to one loudness value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoudnessMeasure {
    /// Root-mean-square of the samples
    #[default]
    Rms,
    /// Largest absolute sample
    Peak,
}

impl LoudnessMeasure {
    /// Loudness of `samples` under this measure
    pub fn measure(self, samples: &[f32]) -> f32 {
        match self {
            LoudnessMeasure::Rms => rms(samples),
            LoudnessMeasure::Peak => peak(samples),
        }
    }
}

/// Root-mean-square; 0.0 for an empty slice
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| sanitize(s) as f64)
        .map(|s| s * s)
        .sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}

/// Largest absolute sample; 0.0 for an empty slice
pub fn peak(samples: &[f32]) -> f32 {
    samples
        .iter()
        .map(|&s| sanitize(s).abs())
        .fold(0.0, f32::max)
}

fn sanitize(sample: f32) -> f32 {
    if sample.is_finite() {
        sample
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms_calculation() {
        assert_eq!(rms(&[]), 0.0);
        assert!((rms(&[1.0, -1.0, 1.0, -1.0]) - 1.0).abs() < 1e-6);
        assert!((rms(&[0.6, 0.8]) - 0.707_106_8).abs() < 1e-5);
    }

    #[test]
    fn test_peak_calculation() {
        assert_eq!(peak(&[]), 0.0);
        assert_eq!(peak(&[0.1, -0.7, 0.3]), 0.7);
    }

    #[test]
    fn test_resilience_to_bad_input() {
        let bad = [f32::NAN, f32::INFINITY, f32::NEG_INFINITY, 0.0];
        assert_eq!(rms(&bad), 0.0);
        assert_eq!(peak(&bad), 0.0);
        assert_eq!(LoudnessMeasure::Rms.measure(&[f32::NAN, 0.5, -0.5]), rms(&[0.0, 0.5, -0.5]));
    }

    #[test]
    fn test_peak_ignores_sign() {
        assert_eq!(LoudnessMeasure::Peak.measure(&[-0.9, 0.2]), 0.9);
        assert_eq!(LoudnessMeasure::default(), LoudnessMeasure::Rms);
    }
}

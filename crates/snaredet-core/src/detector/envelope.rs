//! Attack-instant, decay-smoothed envelope.

/// Smoothed loudness tracker.
///
/// The value jumps straight up to any louder input and otherwise falls by
/// a factor of `decay` per step. It is never negative and never rises
/// without new input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeState {
    value: f32,
    decay: f32,
}

impl EnvelopeState {
    /// New envelope at zero. `decay` is expected in [0, 1); callers validate.
    pub fn new(decay: f32) -> Self {
        Self { value: 0.0, decay }
    }

    /// Current envelope value
    pub fn value(&self) -> f32 {
        self.value
    }

    /// Per-step decay factor
    pub fn decay(&self) -> f32 {
        self.decay
    }

    /// Feed one loudness value: `value = max(instant, value * decay)`
    pub fn update(&mut self, instant: f32) -> f32 {
        let instant = if instant.is_finite() {
            instant.max(0.0)
        } else {
            0.0
        };
        self.value = instant.max(self.value * self.decay);
        self.value
    }

    /// Advance one step with no input
    pub fn decay_only(&mut self) -> f32 {
        self.value *= self.decay;
        self.value
    }

    /// Advance `steps` steps with no input
    pub fn decay_steps(&mut self, steps: u64) -> f32 {
        match steps {
            0 => {}
            1 => {
                self.value *= self.decay;
            }
            n => {
                let factor = (self.decay as f64).powf(n as f64) as f32;
                self.value = (self.value * factor).max(0.0);
            }
        }
        self.value
    }

    /// Back to zero
    pub fn reset(&mut self) {
        self.value = 0.0;
    }
}

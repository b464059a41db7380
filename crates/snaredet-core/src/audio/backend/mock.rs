//! Deterministic audio source for tests. Files are read by `WavSource`.

use std::collections::VecDeque;

use crate::audio::{AudioFrame, AudioSource, SourceEvent};
use crate::Result;

#[derive(Debug, Clone)]
enum Step {
    Frame(Vec<f32>),
    Gap(u64),
    Stall,
}

/// A finite source that replays a prepared script of frames and gaps.
///
/// Frame timestamps advance by exactly one frame duration per frame (gaps
/// included) from a configurable start time, so results never depend on
/// the wall clock.
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    sample_rate: u32,
    frame_size: usize,
    steps: VecDeque<Step>,
    sequence: u64,
    start_ms: i64,
}

impl ScriptedSource {
    /// Empty script
    pub fn new(sample_rate: u32, frame_size: usize) -> Self {
        Self {
            sample_rate,
            frame_size: frame_size.max(1),
            steps: VecDeque::new(),
            sequence: 0,
            start_ms: 0,
        }
    }

    /// One constant-amplitude frame per entry, each with RMS and peak equal
    /// to the given level.
    pub fn from_levels(sample_rate: u32, frame_size: usize, levels: &[f32]) -> Self {
        let mut source = Self::new(sample_rate, frame_size);
        for &level in levels {
            source.push_level(level);
        }
        source
    }

    /// Split a continuous signal into frames; a trailing partial frame is dropped.
    pub fn from_samples(sample_rate: u32, frame_size: usize, samples: &[f32]) -> Self {
        let mut source = Self::new(sample_rate, frame_size);
        for chunk in samples.chunks_exact(source.frame_size) {
            source.push_frame(chunk.to_vec());
        }
        source
    }

    /// Set the timestamp of frame 0
    pub fn with_start_time(mut self, start_ms: i64) -> Self {
        self.start_ms = start_ms;
        self
    }

    /// Append a frame of raw samples
    pub fn push_frame(&mut self, samples: Vec<f32>) -> &mut Self {
        self.steps.push_back(Step::Frame(samples));
        self
    }

    /// Append a frame whose RMS equals `level`
    pub fn push_level(&mut self, level: f32) -> &mut Self {
        let samples = (0..self.frame_size)
            .map(|i| if i % 2 == 0 { level } else { -level })
            .collect();
        self.push_frame(samples)
    }

    /// Append `frames` frames of digital silence
    pub fn push_silence(&mut self, frames: usize) -> &mut Self {
        for _ in 0..frames {
            self.push_frame(vec![0.0; self.frame_size]);
        }
        self
    }

    /// Append a gap of `missing_frames` lost frames
    pub fn push_gap(&mut self, missing_frames: u64) -> &mut Self {
        self.steps.push_back(Step::Gap(missing_frames));
        self
    }

    /// Append an empty poll, as from a device whose audio is late
    pub fn push_stall(&mut self) -> &mut Self {
        self.steps.push_back(Step::Stall);
        self
    }

    /// Script entries not yet delivered
    pub fn remaining(&self) -> usize {
        self.steps.len()
    }

    fn timestamp_for(&self, sequence: u64) -> i64 {
        let frame_ms = self.frame_size as f64 * 1000.0 / self.sample_rate.max(1) as f64;
        self.start_ms + (sequence as f64 * frame_ms).round() as i64
    }
}

impl AudioSource for ScriptedSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn next_event(&mut self) -> Result<SourceEvent> {
        match self.steps.pop_front() {
            Some(Step::Frame(samples)) => {
                let frame = AudioFrame::with_timestamp(
                    self.sequence,
                    samples,
                    self.sample_rate,
                    self.timestamp_for(self.sequence),
                );
                self.sequence += 1;
                Ok(SourceEvent::Frame(frame))
            }
            Some(Step::Gap(missing_frames)) => {
                self.sequence += missing_frames;
                Ok(SourceEvent::Gap { missing_frames })
            }
            Some(Step::Stall) => Ok(SourceEvent::Pending),
            None => Ok(SourceEvent::Ended),
        }
    }
}

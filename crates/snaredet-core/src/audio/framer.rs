//! Re-chunking of device callbacks into fixed-size frames.

use std::collections::VecDeque;

use super::AudioFrame;

/// Accumulates callback buffers of arbitrary length into frames of exactly
/// `frame_size` samples, numbered in capture order.
///
/// Frames are stamped from the stream start plus `sequence` frame durations,
/// so a backlog in the analysis loop does not delay their timestamps.
#[derive(Debug)]
pub struct Framer {
    sample_rate: u32,
    frame_size: usize,
    pending: Vec<f32>,
    ready: VecDeque<AudioFrame>,
    next_sequence: u64,
    start_ms: i64,
}

impl Framer {
    /// Create a framer whose stream starts now; a `frame_size` of zero is
    /// treated as one sample.
    pub fn new(sample_rate: u32, frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            sample_rate,
            frame_size,
            pending: Vec::with_capacity(frame_size),
            ready: VecDeque::new(),
            next_sequence: 0,
            start_ms: crate::unix_millis(),
        }
    }

    /// Set the timestamp of frame 0
    pub fn with_start_time(mut self, start_ms: i64) -> Self {
        self.start_ms = start_ms;
        self
    }

    /// Acquisition time of the frame numbered `sequence`
    pub fn timestamp_for(&self, sequence: u64) -> i64 {
        let frame_ms = self.frame_size as f64 * 1000.0 / self.sample_rate.max(1) as f64;
        self.start_ms + (sequence as f64 * frame_ms).round() as i64
    }

    /// Samples per frame
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Samples waiting for the current frame to fill
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Sequence number the next completed frame will carry
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Append captured samples, completing as many frames as possible.
    pub fn push(&mut self, samples: &[f32]) {
        let mut rest = samples;
        while !rest.is_empty() {
            let room = self.frame_size - self.pending.len();
            let take = room.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == self.frame_size {
                let samples =
                    std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_size));
                self.ready.push_back(AudioFrame::with_timestamp(
                    self.next_sequence,
                    samples,
                    self.sample_rate,
                    self.timestamp_for(self.next_sequence),
                ));
                self.next_sequence += 1;
            }
        }
    }

    /// Take the oldest completed frame
    pub fn pop(&mut self) -> Option<AudioFrame> {
        self.ready.pop_front()
    }

    /// Account for `dropped` samples that never reached the framer.
    ///
    /// The partially filled frame is no longer contiguous and is discarded.
    /// Returns the number of whole frames the stream skipped (at least one).
    pub fn skip(&mut self, dropped: usize) -> u64 {
        let lost = ((self.pending.len() + dropped) / self.frame_size).max(1) as u64;
        self.pending.clear();
        self.next_sequence += lost;
        lost
    }
}

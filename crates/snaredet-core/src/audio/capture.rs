//! Hand-off between a realtime capture callback and the analysis thread.
//!
//! The callback side ([`CaptureSender`]) never blocks. A chunk that does
//! not fit in the channel is discarded and counted, and the count rides on
//! the next chunk that does get through. Losses therefore reach the
//! [`CaptureQueue`] in stream order, exactly where the discontinuity is,
//! and no frame is ever built from samples on both sides of a drop.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use tracing::{debug, warn};

use super::{Framer, SourceEvent};
use crate::{CoreError, Result};

/// Consecutive empty waits before a stalled stream is reported
const STALL_WARN_POLLS: u32 = 20;

/// Samples from one callback, plus the samples discarded just before them
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedChunk {
    /// Samples lost between the previous delivered chunk and this one
    pub lost_before: usize,
    /// Mono samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
}

/// Producer half, owned by the capture callback.
#[derive(Debug)]
pub struct CaptureSender {
    tx: Sender<CapturedChunk>,
    lost: usize,
}

impl CaptureSender {
    /// Offer one callback's samples without blocking.
    ///
    /// Returns false if the chunk was discarded; its length is then carried
    /// on the next chunk that gets through.
    pub fn push(&mut self, samples: Vec<f32>) -> bool {
        let len = samples.len();
        let chunk = CapturedChunk {
            lost_before: self.lost,
            samples,
        };
        match self.tx.try_send(chunk) {
            Ok(()) => {
                self.lost = 0;
                true
            }
            Err(_) => {
                self.lost += len;
                false
            }
        }
    }

    /// Samples discarded since the last delivered chunk
    pub fn lost(&self) -> usize {
        self.lost
    }
}

/// Consumer half: frames delivered chunks and reports losses as gaps.
#[derive(Debug)]
pub struct CaptureQueue {
    rx: Receiver<CapturedChunk>,
    framer: Framer,
    wait: Duration,
    empty_polls: u32,
}

/// A bounded channel of `capacity` chunks between a callback and a framer.
///
/// `wait` bounds how long [`CaptureQueue::next_event`] blocks.
pub fn capture_channel(
    capacity: usize,
    framer: Framer,
    wait: Duration,
) -> (CaptureSender, CaptureQueue) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        CaptureSender { tx, lost: 0 },
        CaptureQueue {
            rx,
            framer,
            wait,
            empty_polls: 0,
        },
    )
}

impl CaptureQueue {
    /// Samples per frame
    pub fn frame_size(&self) -> usize {
        self.framer.frame_size()
    }

    /// Next frame, gap or empty poll.
    ///
    /// Frames completed before a loss are always returned before the gap
    /// that follows them. Fails with [`CoreError::DeviceDisconnected`] once
    /// the sender is gone.
    pub fn next_event(&mut self) -> Result<SourceEvent> {
        loop {
            if let Some(frame) = self.framer.pop() {
                return Ok(SourceEvent::Frame(frame));
            }

            let chunk = match self.rx.recv_timeout(self.wait) {
                Ok(chunk) => chunk,
                Err(RecvTimeoutError::Timeout) => {
                    self.empty_polls += 1;
                    if self.empty_polls == STALL_WARN_POLLS {
                        warn!(
                            "No audio received for {:?}, is the input stalled?",
                            self.wait * STALL_WARN_POLLS
                        );
                    }
                    return Ok(SourceEvent::Pending);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CoreError::DeviceDisconnected(
                        "capture stream closed".to_string(),
                    ))
                }
            };
            if self.empty_polls >= STALL_WARN_POLLS {
                debug!("Audio resumed after {} empty polls", self.empty_polls);
            }
            self.empty_polls = 0;

            if chunk.lost_before > 0 {
                let missing_frames = self.framer.skip(chunk.lost_before);
                self.framer.push(&chunk.samples);
                warn!(
                    "Analysis fell behind: {} samples dropped ({} frames)",
                    chunk.lost_before, missing_frames
                );
                return Ok(SourceEvent::Gap { missing_frames });
            }
            self.framer.push(&chunk.samples);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(capacity: usize) -> (CaptureSender, CaptureQueue) {
        capture_channel(
            capacity,
            Framer::new(1000, 4).with_start_time(0),
            Duration::from_millis(5),
        )
    }

    fn frame(event: SourceEvent) -> (u64, Vec<f32>) {
        match event {
            SourceEvent::Frame(frame) => (frame.sequence, frame.samples),
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    #[test]
    fn test_sender_carries_loss_to_next_chunk() {
        let (mut tx, queue) = channel(1);
        assert!(tx.push(vec![0.1; 4]));
        assert!(!tx.push(vec![0.2; 3]));
        assert!(!tx.push(vec![0.3; 2]));
        assert_eq!(tx.lost(), 5);

        let first = queue.rx.try_recv().unwrap();
        assert_eq!(first.lost_before, 0);
        assert!(tx.push(vec![0.4; 4]));
        assert_eq!(tx.lost(), 0);
        assert_eq!(queue.rx.try_recv().unwrap().lost_before, 5);
    }

    #[test]
    fn test_no_frame_spans_a_drop() {
        let (mut tx, mut queue) = channel(2);
        tx.push(vec![1.0, 1.0]);
        tx.push(vec![1.0, 1.0, 2.0, 2.0]);
        // Channel full: this chunk is lost.
        assert!(!tx.push(vec![9.0; 4]));

        assert_eq!(frame(queue.next_event().unwrap()), (0, vec![1.0; 4]));

        tx.push(vec![3.0; 4]);
        // The half frame of 2.0s is discarded with the drop.
        assert_eq!(
            queue.next_event().unwrap(),
            SourceEvent::Gap { missing_frames: 1 }
        );
        let (sequence, samples) = frame(queue.next_event().unwrap());
        assert_eq!(samples, vec![3.0; 4]);
        assert_eq!(sequence, 2);
    }

    #[test]
    fn test_frames_before_drop_come_before_gap() {
        let (mut tx, mut queue) = channel(1);
        tx.push(vec![0.5; 8]);
        assert!(!tx.push(vec![9.0; 8]));
        assert_eq!(frame(queue.next_event().unwrap()).0, 0);
        tx.push(vec![0.7; 4]);

        assert_eq!(frame(queue.next_event().unwrap()).0, 1);
        assert_eq!(
            queue.next_event().unwrap(),
            SourceEvent::Gap { missing_frames: 2 }
        );
        assert_eq!(frame(queue.next_event().unwrap()), (4, vec![0.7; 4]));
    }

    #[test]
    fn test_late_audio_is_pending_not_lost() {
        let (mut tx, mut queue) = channel(4);
        assert_eq!(queue.next_event().unwrap(), SourceEvent::Pending);

        tx.push(vec![0.5; 4]);
        let (sequence, samples) = frame(queue.next_event().unwrap());
        assert_eq!(sequence, 0);
        assert_eq!(samples, vec![0.5; 4]);
    }

    #[test]
    fn test_sequences_stay_contiguous_without_loss() {
        let (mut tx, mut queue) = channel(16);
        for chunk in [3usize, 5, 1, 7] {
            tx.push(vec![0.0; chunk]);
        }
        let sequences: Vec<u64> = (0..4).map(|_| frame(queue.next_event().unwrap()).0).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3]);
        assert_eq!(queue.next_event().unwrap(), SourceEvent::Pending);
    }

    #[test]
    fn test_closed_sender_is_disconnect() {
        let (tx, mut queue) = channel(1);
        drop(tx);
        assert!(matches!(
            queue.next_event(),
            Err(CoreError::DeviceDisconnected(_))
        ));
    }
}

//! Detection loop
//!
//! Pulls events from an [`AudioSource`], feeds them to a [`HitDetector`] and
//! hands every hit to a [`HitSink`]. The loop owns its source and detector
//! and runs on a dedicated thread; the only thing it shares is the stop
//! flag. Publishing a hit never waits on the consumer.

use crossbeam_channel::{Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::audio::{AudioSource, SourceEvent};
use crate::detector::{HitDetector, HitEvent};
use crate::CoreError;

/// Receiver of detected hits. `publish` must return immediately.
///
/// A sink that cannot take a hit drops it and returns false. The hit keeps
/// its number, so consumers see the skipped number rather than a silently
/// renumbered stream.
pub trait HitSink: Send {
    /// Hand off one hit without blocking; false if it was dropped
    fn publish(&self, event: HitEvent) -> bool;
}

impl HitSink for Sender<HitEvent> {
    fn publish(&self, event: HitEvent) -> bool {
        match self.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!("Hit sink full, dropping hit #{}", event.hit_number);
                false
            }
            Err(TrySendError::Disconnected(event)) => {
                debug!("Hit sink closed, dropping hit #{}", event.hit_number);
                false
            }
        }
    }
}

/// Shared flag asking a running loop to stop after its current event.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Unset flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to stop
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether a stop was requested
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Why the loop ended
#[derive(Debug)]
pub enum LoopOutcome {
    /// The stop flag was set
    Stopped,
    /// A finite source ran out
    SourceEnded,
    /// The source failed; no further audio will arrive
    Failed(CoreError),
}

impl LoopOutcome {
    /// True if the loop ended because of a source error
    pub fn is_failure(&self) -> bool {
        matches!(self, LoopOutcome::Failed(_))
    }
}

/// Counters reported when the loop returns
#[derive(Debug)]
pub struct LoopSummary {
    /// Frames analysed
    pub frames: u64,
    /// Gap events seen
    pub gaps: u64,
    /// Frames lost across all gaps
    pub missing_frames: u64,
    /// Hits detected
    pub hits: u64,
    /// Detected hits the sink could not take
    pub hits_dropped: u64,
    /// Polls that found no audio ready
    pub empty_polls: u64,
    /// Why the loop ended
    pub outcome: LoopOutcome,
}

/// Source → detector → sink, one event at a time.
pub struct DetectionLoop<S, K> {
    source: S,
    detector: HitDetector,
    sink: K,
    stop: StopHandle,
}

impl<S, K> DetectionLoop<S, K>
where
    S: AudioSource + 'static,
    K: HitSink + 'static,
{
    /// Wire a loop together; nothing runs until [`run`](Self::run) or [`spawn`](Self::spawn)
    pub fn new(source: S, detector: HitDetector, sink: K) -> Self {
        Self {
            source,
            detector,
            sink,
            stop: StopHandle::new(),
        }
    }

    /// Use an existing stop flag instead of a private one
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    /// Flag that stops this loop
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Run on the current thread until stopped, ended or failed
    pub fn run(mut self) -> LoopSummary {
        let mut frames = 0u64;
        let mut gaps = 0u64;
        let mut missing_frames = 0u64;
        let mut hits = 0u64;
        let mut hits_dropped = 0u64;
        let mut empty_polls = 0u64;

        let frame_duration = self.source.frame_duration();
        let report_every = report_interval(frame_duration);
        info!(
            "Detection loop started: {} Hz, {} samples/frame",
            self.source.sample_rate(),
            self.source.frame_size()
        );

        let outcome = loop {
            if self.stop.is_stopped() {
                break LoopOutcome::Stopped;
            }

            match self.source.next_event() {
                Ok(SourceEvent::Frame(frame)) => {
                    frames += 1;
                    if let Some(hit) = self.detector.process_frame(&frame) {
                        hits += 1;
                        if !self.sink.publish(hit) {
                            hits_dropped += 1;
                        }
                    }
                    if frames % report_every == 0 {
                        debug!(
                            "frames={} hits={} envelope={:.4} state={:?}",
                            frames,
                            hits,
                            self.detector.envelope(),
                            self.detector.state()
                        );
                    }
                }
                Ok(SourceEvent::Gap { missing_frames: n }) => {
                    gaps += 1;
                    missing_frames += n;
                    self.detector.process_gap(n);
                }
                // Late audio: nothing to analyse and no time has passed on
                // the stream.
                Ok(SourceEvent::Pending) => empty_polls += 1,
                Ok(SourceEvent::Ended) => break LoopOutcome::SourceEnded,
                Err(e) => {
                    error!("Audio source failed: {}", e);
                    break LoopOutcome::Failed(e);
                }
            }
        };

        info!(
            "Detection loop finished ({:?}): {} frames, {} gaps, {} hits ({} dropped)",
            outcome, frames, gaps, hits, hits_dropped
        );

        LoopSummary {
            frames,
            gaps,
            missing_frames,
            hits,
            hits_dropped,
            empty_polls,
            outcome,
        }
    }

    /// Run on a new thread named `snare-detect`
    pub fn spawn(self) -> std::io::Result<thread::JoinHandle<LoopSummary>> {
        thread::Builder::new()
            .name("snare-detect".to_string())
            .spawn(move || self.run())
    }
}

/// Frames per debug report, roughly one second of audio
fn report_interval(frame_duration: Duration) -> u64 {
    let millis = frame_duration.as_millis() as u64;
    if millis == 0 {
        return 1000;
    }
    (1000 / millis).max(1)
}

use crossbeam_channel::{bounded, Receiver};
use proptest::prelude::*;
use snaredet_core::audio::{capture_channel, CaptureQueue, Framer};
use snaredet_core::{
    AudioFrame, AudioSource, CoreError, DetectionLoop, DetectorConfig, GapPolicy, HitDetector,
    HitEvent, LoopOutcome, PreprocessConfig, ScriptedSource, SourceEvent, WavSource,
};
use std::f32::consts::PI;
use std::thread;
use std::time::{Duration, Instant};

const RATE: u32 = 1000;
const FRAME: usize = 50;

fn wait_for_condition<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

fn drain(rx: &Receiver<HitEvent>) -> Vec<HitEvent> {
    rx.try_iter().collect()
}

/// Endless quiet source paced at real time, for stop tests
struct SilentSource {
    sequence: u64,
}

impl AudioSource for SilentSource {
    fn sample_rate(&self) -> u32 {
        RATE
    }

    fn frame_size(&self) -> usize {
        FRAME
    }

    fn next_event(&mut self) -> snaredet_core::Result<SourceEvent> {
        thread::sleep(Duration::from_millis(2));
        let frame = AudioFrame::new(self.sequence, vec![0.0; FRAME], RATE);
        self.sequence += 1;
        Ok(SourceEvent::Frame(frame))
    }
}

/// Delivers a few frames, then reports the device gone
struct UnpluggedSource {
    frames_left: usize,
}

impl AudioSource for UnpluggedSource {
    fn sample_rate(&self) -> u32 {
        RATE
    }

    fn frame_size(&self) -> usize {
        FRAME
    }

    fn next_event(&mut self) -> snaredet_core::Result<SourceEvent> {
        if self.frames_left == 0 {
            return Err(CoreError::DeviceDisconnected("unplugged".to_string()));
        }
        self.frames_left -= 1;
        Ok(SourceEvent::Frame(AudioFrame::new(0, vec![0.0; FRAME], RATE)))
    }
}

/// Capture queue driven directly by the test instead of a device
struct QueueSource {
    queue: CaptureQueue,
}

impl AudioSource for QueueSource {
    fn sample_rate(&self) -> u32 {
        RATE
    }

    fn frame_size(&self) -> usize {
        self.queue.frame_size()
    }

    fn next_event(&mut self) -> snaredet_core::Result<SourceEvent> {
        self.queue.next_event()
    }
}

#[test]
fn test_reference_sequence_single_hit() {
    let mut levels = vec![0.05, 0.05, 0.9];
    levels.extend(std::iter::repeat(0.05).take(50));
    let source = ScriptedSource::from_levels(RATE, FRAME, &levels).with_start_time(5_000);
    let detector = HitDetector::new(DetectorConfig::default()).unwrap();
    let (tx, rx) = bounded(16);

    let summary = DetectionLoop::new(source, detector, tx).run();
    assert!(matches!(summary.outcome, LoopOutcome::SourceEnded));
    assert_eq!(summary.frames, levels.len() as u64);
    assert_eq!(summary.hits, 1);

    let hits = drain(&rx);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].hit_number, 1);
    assert_eq!(hits[0].timestamp_ms, 5_100);
    assert!((hits[0].rms_value - 0.9).abs() < 1e-4);
    assert_eq!(hits[0].threshold, 0.2);
}

#[test]
fn test_second_strike_after_decay() {
    let mut source = ScriptedSource::new(RATE, FRAME);
    source.push_level(0.9);
    for _ in 0..40 {
        source.push_level(0.05);
    }
    source.push_level(0.7);
    source.push_silence(5);

    let detector = HitDetector::new(DetectorConfig::default()).unwrap();
    let (tx, rx) = bounded(16);
    DetectionLoop::new(source, detector, tx).run();

    let numbers: Vec<u64> = drain(&rx).iter().map(|h| h.hit_number).collect();
    assert_eq!(numbers, vec![1, 2]);
}

#[test]
fn test_invalid_decay_rejected_before_capture() {
    let config = DetectorConfig {
        decay: 1.0,
        ..Default::default()
    };
    let err = HitDetector::new(config).unwrap_err();
    assert!(err.to_string().contains("decay"));
}

#[test]
fn test_gap_never_emits_hit() {
    for policy in [GapPolicy::Silence, GapPolicy::Hold] {
        let mut source = ScriptedSource::new(RATE, FRAME);
        source.push_level(0.9).push_gap(100).push_level(0.05);

        let config = DetectorConfig {
            gap_policy: policy,
            ..Default::default()
        };
        let detector = HitDetector::new(config).unwrap();
        let (tx, rx) = bounded(16);
        let summary = DetectionLoop::new(source, detector, tx).run();

        assert_eq!(summary.gaps, 1);
        assert_eq!(summary.missing_frames, 100);
        assert_eq!(drain(&rx).len(), 1, "policy {:?}", policy);
    }
}

#[test]
fn test_silence_gap_rearms_but_hold_does_not() {
    let script = |source: &mut ScriptedSource| {
        source.push_level(0.9).push_gap(60).push_level(0.9);
    };

    let mut silent = ScriptedSource::new(RATE, FRAME);
    script(&mut silent);
    let (tx, rx) = bounded(16);
    DetectionLoop::new(
        silent,
        HitDetector::new(DetectorConfig::default()).unwrap(),
        tx,
    )
    .run();
    assert_eq!(drain(&rx).len(), 2);

    let mut held = ScriptedSource::new(RATE, FRAME);
    script(&mut held);
    let config = DetectorConfig {
        gap_policy: GapPolicy::Hold,
        ..Default::default()
    };
    let (tx, rx) = bounded(16);
    DetectionLoop::new(held, HitDetector::new(config).unwrap(), tx).run();
    assert_eq!(drain(&rx).len(), 1);
}

#[test]
fn test_device_loss_is_reported_not_papered_over() {
    let source = UnpluggedSource { frames_left: 3 };
    let detector = HitDetector::new(DetectorConfig::default()).unwrap();
    let (tx, rx) = bounded(16);

    let summary = DetectionLoop::new(source, detector, tx).run();
    assert_eq!(summary.frames, 3);
    assert!(summary.outcome.is_failure());
    match summary.outcome {
        LoopOutcome::Failed(e) => assert!(e.is_device_error()),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(drain(&rx).is_empty());
}

#[test]
fn test_spawned_loop_stops_on_request() {
    let source = SilentSource { sequence: 0 };
    let detector = HitDetector::new(DetectorConfig::default()).unwrap();
    let (tx, _rx) = bounded(16);
    let detection = DetectionLoop::new(source, detector, tx);
    let stop = detection.stop_handle();

    let handle = detection.spawn().unwrap();
    thread::sleep(Duration::from_millis(20));
    stop.stop();

    assert!(wait_for_condition(Duration::from_secs(2), || {
        handle.is_finished()
    }));
    let summary = handle.join().unwrap();
    assert!(matches!(summary.outcome, LoopOutcome::Stopped));
    assert!(summary.frames > 0);
    assert_eq!(summary.hits, 0);
}

#[test]
fn test_bandpass_ignores_high_pitched_noise() {
    let sample_rate = 16_000;
    let frame_size = 800;
    let preprocess = PreprocessConfig {
        enabled: true,
        downsample_hz: None,
        ..Default::default()
    };
    let tone = |freq: f32| -> Vec<f32> {
        (0..frame_size * 20)
            .map(|i| 0.8 * (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    };

    let mut detector =
        HitDetector::with_preprocessor(DetectorConfig::default(), &preprocess, sample_rate)
            .unwrap();
    let mut high = ScriptedSource::from_samples(sample_rate, frame_size, &tone(4000.0));
    while let SourceEvent::Frame(frame) = high.next_event().unwrap() {
        assert!(detector.process_frame(&frame).is_none());
    }

    let mut detector =
        HitDetector::with_preprocessor(DetectorConfig::default(), &preprocess, sample_rate)
            .unwrap();
    let mut low = ScriptedSource::from_samples(sample_rate, frame_size, &tone(130.0));
    let mut hits = 0;
    while let SourceEvent::Frame(frame) = low.next_event().unwrap() {
        hits += detector.process_frame(&frame).is_some() as usize;
    }
    assert_eq!(hits, 1);
}

#[test]
fn test_capture_overflow_reaches_detector_as_gap() {
    let (mut tx, mut queue) = capture_channel(
        2,
        Framer::new(RATE, FRAME).with_start_time(0),
        Duration::from_millis(5),
    );
    assert!(tx.push(vec![0.05; FRAME]));
    assert!(tx.push(vec![0.05; FRAME / 2]));
    // Channel full: three frames of audio are lost.
    assert!(!tx.push(vec![0.05; FRAME * 3]));
    assert!(matches!(
        queue.next_event().unwrap(),
        SourceEvent::Frame(ref f) if f.sequence == 0
    ));
    // The strike lands right after the loss.
    assert!(tx.push(vec![0.9; FRAME]));
    drop(tx);

    let detector = HitDetector::new(DetectorConfig::default()).unwrap();
    let (hits_tx, hits_rx) = bounded(8);
    let summary = DetectionLoop::new(QueueSource { queue }, detector, hits_tx).run();

    assert_eq!(summary.gaps, 1);
    assert_eq!(summary.missing_frames, 3);
    assert_eq!(summary.frames, 1);
    assert!(matches!(
        summary.outcome,
        LoopOutcome::Failed(CoreError::DeviceDisconnected(_))
    ));

    // The half frame before the loss is discarded, so the strike frame
    // keeps its place on the stream clock.
    let hits = drain(&hits_rx);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].timestamp_ms, 4 * FRAME as i64);
    assert!((hits[0].rms_value - 0.9).abs() < 1e-4);
}

#[test]
fn test_wav_file_through_detection_loop() {
    let file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(file.path(), spec).unwrap();
    // Two strikes 2 s apart, each a 50 ms burst at about 0.9.
    for i in 0..RATE as usize * 4 {
        let in_strike = i < FRAME || (2000..2000 + FRAME).contains(&i);
        let level = if in_strike { 29_491i16 } else { 0 };
        writer.write_sample(if i % 2 == 0 { level } else { -level }).unwrap();
    }
    writer.finalize().unwrap();

    let source = WavSource::open(file.path(), 50).unwrap();
    assert_eq!(source.frames_remaining(), 80);
    let detector = HitDetector::new(DetectorConfig::default()).unwrap();
    let (tx, rx) = bounded(8);

    let summary = DetectionLoop::new(source, detector, tx).run();
    assert!(matches!(summary.outcome, LoopOutcome::SourceEnded));
    let hits = drain(&rx);
    let times: Vec<i64> = hits.iter().map(|h| h.timestamp_ms).collect();
    assert_eq!(times, vec![0, 2000]);
    assert!((hits[0].rms_value - 0.9).abs() < 1e-3);
}

fn strike() -> impl Strategy<Value = (Vec<f32>, Vec<f32>, Vec<f32>)> {
    let threshold = 0.2f32;
    (
        prop::collection::vec(0.0f32..=threshold, 0..10),
        prop::collection::vec(0.0f32..1.0, 1..6),
        threshold + 0.01..1.0f32,
        prop::collection::vec(0.0f32..1.0, 0..80),
    )
        .prop_map(move |(before, mut rise, peak, mut fall)| {
            rise.iter_mut().for_each(|x| *x *= peak);
            rise.sort_by(|a, b| a.total_cmp(b));
            rise.push(peak);
            fall.iter_mut().for_each(|x| *x *= peak);
            fall.sort_by(|a, b| b.total_cmp(a));
            (before, rise, fall)
        })
}

proptest! {
    #[test]
    fn prop_one_strike_one_hit(
        (before, rise, fall) in strike(),
        decay in 0.0f32..0.999,
        refractory_ms in prop::option::of(0u64..500),
    ) {
        let config = DetectorConfig { decay, refractory_ms, ..Default::default() };
        let mut detector = HitDetector::new(config).unwrap();

        let levels: Vec<f32> = before.iter().chain(&rise).chain(&fall).copied().collect();
        let mut hits = Vec::new();
        for (i, &level) in levels.iter().enumerate() {
            let samples = (0..FRAME).map(|n| if n % 2 == 0 { level } else { -level }).collect();
            let frame = AudioFrame::with_timestamp(i as u64, samples, RATE, i as i64 * 50);
            if let Some(hit) = detector.process_frame(&frame) {
                hits.push(hit);
            }
        }

        prop_assert_eq!(hits.len(), 1);
        prop_assert_eq!(hits[0].hit_number, 1);
    }

    #[test]
    fn prop_hit_numbers_are_consecutive(
        levels in prop::collection::vec(0.0f32..1.0, 1..200),
        decay in 0.0f32..0.99,
    ) {
        let config = DetectorConfig { decay, ..Default::default() };
        let detector = HitDetector::new(config).unwrap();
        let source = ScriptedSource::from_levels(RATE, FRAME, &levels);
        let (tx, rx) = bounded(levels.len());
        DetectionLoop::new(source, detector, tx).run();

        for (expected, hit) in (1u64..).zip(rx.try_iter()) {
            prop_assert_eq!(hit.hit_number, expected);
        }
    }
}

//! WAV file input for offline analysis.

use std::collections::VecDeque;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::{frame_size_for, AudioFrame, AudioSource, Framer, SourceEvent};
use crate::{CoreError, Result};

/// A finite source over a decoded WAV file.
///
/// Integer PCM is scaled by its full-scale value (so 16-bit samples are
/// divided by 32768), float PCM is taken as is, and only channel 0 is kept.
/// Frame timestamps count milliseconds from the start of the file. A
/// trailing partial frame is not analysed.
#[derive(Debug)]
pub struct WavSource {
    sample_rate: u32,
    frame_size: usize,
    frames: VecDeque<AudioFrame>,
    duration: Duration,
}

impl WavSource {
    /// Decode `path` into frames of `frame_duration_ms`
    pub fn open(path: &Path, frame_duration_ms: u32) -> Result<Self> {
        let reader = hound::WavReader::open(path)
            .map_err(|e| CoreError::AudioFile(format!("{}: {}", path.display(), e)))?;
        Self::from_reader(reader, frame_duration_ms)
    }

    /// Decode an already opened WAV stream
    pub fn from_reader<R: Read>(
        reader: hound::WavReader<R>,
        frame_duration_ms: u32,
    ) -> Result<Self> {
        let spec = reader.spec();
        let samples = read_first_channel(reader)?;

        let frame_size = frame_size_for(spec.sample_rate, frame_duration_ms);
        if frame_size == 0 {
            return Err(CoreError::InvalidConfig(format!(
                "{} ms at {} Hz yields an empty frame",
                frame_duration_ms, spec.sample_rate
            )));
        }

        let mut framer = Framer::new(spec.sample_rate, frame_size).with_start_time(0);
        framer.push(&samples);
        let frames: VecDeque<AudioFrame> = std::iter::from_fn(|| framer.pop()).collect();
        if framer.pending_len() > 0 {
            debug!("Ignoring {} trailing samples", framer.pending_len());
        }

        Ok(Self {
            sample_rate: spec.sample_rate,
            frame_size,
            frames,
            duration: Duration::from_secs_f64(samples.len() as f64 / spec.sample_rate as f64),
        })
    }

    /// Length of the decoded audio
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Frames not yet delivered
    pub fn frames_remaining(&self) -> usize {
        self.frames.len()
    }
}

impl AudioSource for WavSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn next_event(&mut self) -> Result<SourceEvent> {
        Ok(match self.frames.pop_front() {
            Some(frame) => SourceEvent::Frame(frame),
            None => SourceEvent::Ended,
        })
    }
}

fn read_first_channel<R: Read>(mut reader: hound::WavReader<R>) -> Result<Vec<f32>> {
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(CoreError::AudioFile("sample rate is zero".to_string()));
    }
    let channels = spec.channels.max(1) as usize;
    let decode = |e: hound::Error| CoreError::AudioFile(e.to_string());

    match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .step_by(channels)
            .map(|s| s.map_err(decode))
            .collect(),
        hound::SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                return Err(CoreError::AudioFile(format!(
                    "unsupported bit depth {}",
                    spec.bits_per_sample
                )));
            }
            let scale = 1.0 / (1u64 << (spec.bits_per_sample - 1)) as f64;
            reader
                .samples::<i32>()
                .step_by(channels)
                .map(|s| s.map(|v| (v as f64 * scale) as f32).map_err(decode))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    type Writer<'a> = hound::WavWriter<&'a mut Cursor<Vec<u8>>>;

    fn encode(spec: hound::WavSpec, write: impl FnOnce(&mut Writer<'_>)) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            write(&mut writer);
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn decode(bytes: Vec<u8>, frame_ms: u32) -> WavSource {
        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        WavSource::from_reader(reader, frame_ms).unwrap()
    }

    fn frames(source: &mut WavSource) -> Vec<AudioFrame> {
        let mut out = Vec::new();
        while let SourceEvent::Frame(frame) = source.next_event().unwrap() {
            out.push(frame);
        }
        out
    }

    #[test]
    fn test_stereo_i16_keeps_first_channel() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 1000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let bytes = encode(spec, |w| {
            for _ in 0..120 {
                w.write_sample(16384i16).unwrap();
                w.write_sample(-32768i16).unwrap();
            }
        });

        let mut source = decode(bytes, 50);
        assert_eq!(source.sample_rate(), 1000);
        assert!((source.duration().as_secs_f64() - 0.12).abs() < 1e-9);
        let frames = frames(&mut source);

        // 120 samples: two 50-sample frames, the last 20 are not analysed.
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.samples.iter().all(|&s| s == 0.5)));
        assert_eq!(frames[1].sequence, 1);
        assert_eq!(frames[1].timestamp_ms, 50);
        assert_eq!(source.next_event().unwrap(), SourceEvent::Ended);
    }

    #[test]
    fn test_eight_bit_is_centred() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 100,
            bits_per_sample: 8,
            sample_format: hound::SampleFormat::Int,
        };
        let bytes = encode(spec, |w| {
            for _ in 0..10 {
                w.write_sample(-64i8).unwrap();
            }
        });
        let frames = frames(&mut decode(bytes, 100));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].samples, vec![-0.5; 10]);
    }

    #[test]
    fn test_float_passes_through() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 100,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let bytes = encode(spec, |w| {
            for i in 0..10 {
                w.write_sample(i as f32 / 10.0).unwrap();
            }
        });
        let frames = frames(&mut decode(bytes, 50));
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].samples, vec![0.0, 0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn test_missing_file() {
        let err = WavSource::open(Path::new("/nonexistent/strike.wav"), 50).unwrap_err();
        assert!(matches!(err, CoreError::AudioFile(_)));
    }
}

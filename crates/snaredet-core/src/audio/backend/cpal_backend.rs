//! Input capture through cpal
//!
//! The realtime callback never blocks: it reduces each buffer to channel 0,
//! converts to `f32` and offers it to a [`CaptureSender`]. When the analysis
//! side falls behind the buffer is dropped, and [`CpalSource`] reports the
//! loss as a [`SourceEvent::Gap`] at the point in the stream where it
//! happened.
//!
//! `cpal::Stream` is not `Send`, so opening a device yields two halves: the
//! [`CpalBackend`] that owns the stream and stays on the opening thread, and
//! the [`CpalSource`] that can be moved into the detection thread.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use super::AudioDeviceInfo;
use crate::audio::{
    capture_channel, frame_size_for, AudioConfig, AudioSource, CaptureQueue, CaptureSender,
    Framer, SourceEvent,
};
use crate::{CoreError, Result};

/// Owner of the running capture stream. Dropping it closes the device.
pub struct CpalBackend {
    _stream: cpal::Stream,
    device_name: String,
    sample_rate: u32,
    channels: u16,
}

impl CpalBackend {
    /// Enumerate every input device on the default host
    pub fn list_devices() -> Result<Vec<AudioDeviceInfo>> {
        let host = cpal::default_host();
        let default_name = host.default_input_device().and_then(|d| d.name().ok());

        let devices = host
            .input_devices()
            .map_err(|e| CoreError::DeviceUnavailable(format!("cannot enumerate devices: {}", e)))?;

        let mut infos = Vec::new();
        for (index, device) in devices.enumerate() {
            let name = device
                .name()
                .unwrap_or_else(|_| "Unknown Device".to_string());
            let (channels, default_sample_rate) = match device.default_input_config() {
                Ok(config) => (config.channels(), config.sample_rate().0),
                Err(_) => (0, 0),
            };
            infos.push(AudioDeviceInfo {
                index,
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                channels,
                default_sample_rate,
            });
        }

        Ok(infos)
    }

    /// Open the configured device and start capturing.
    ///
    /// Fails with [`CoreError::DeviceNotFound`] if the selector matches no
    /// device and [`CoreError::DeviceUnavailable`] if the stream cannot be
    /// built or started.
    pub fn open(config: &AudioConfig) -> Result<(CpalBackend, CpalSource)> {
        config.validate()?;

        let host = cpal::default_host();
        let device = select_device(&host, config.device.as_deref())?;
        let device_name = device
            .name()
            .unwrap_or_else(|_| "Unknown Device".to_string());

        let supported = choose_stream_config(&device, config.sample_rate)?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        if sample_rate != config.sample_rate {
            warn!(
                "Device '{}' does not support {} Hz, capturing at {} Hz",
                device_name, config.sample_rate, sample_rate
            );
        }

        let frame_size = frame_size_for(sample_rate, config.frame_duration_ms);
        let (samples_tx, queue) = capture_channel(
            config.channel_capacity,
            Framer::new(sample_rate, frame_size),
            config.frame_duration() * 2,
        );
        let (errors_tx, errors_rx) = bounded::<String>(4);

        let stream_config: cpal::StreamConfig = supported.config();
        let capture = Capture {
            channels: channels.max(1) as usize,
            samples: samples_tx,
            errors: errors_tx,
        };

        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, capture)?,
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, capture)?,
            cpal::SampleFormat::I32 => build_stream::<i32>(&device, &stream_config, capture)?,
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, capture)?,
            other => {
                return Err(CoreError::UnsupportedFormat(format!(
                    "{:?} on '{}'",
                    other, device_name
                )))
            }
        };

        stream
            .play()
            .map_err(|e| CoreError::DeviceUnavailable(format!("{}: {}", device_name, e)))?;

        info!(
            "Capturing from '{}' at {} Hz, {} channel(s), {} samples/frame",
            device_name, sample_rate, channels, frame_size
        );

        let source = CpalSource {
            queue,
            errors: errors_rx,
            sample_rate,
        };

        Ok((
            CpalBackend {
                _stream: stream,
                device_name,
                sample_rate,
                channels,
            },
            source,
        ))
    }

    /// Name of the device being captured
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Actual capture rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channels delivered by the device (only channel 0 is analysed)
    pub fn channels(&self) -> u16 {
        self.channels
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        debug!("Closing capture stream on '{}'", self.device_name);
    }
}

/// The `Send` half of an open device: frames the captured samples.
pub struct CpalSource {
    queue: CaptureQueue,
    errors: Receiver<String>,
    sample_rate: u32,
}

impl CpalSource {
    fn check_errors(&self) -> Result<()> {
        match self.errors.try_recv() {
            Ok(message) => Err(CoreError::DeviceDisconnected(message)),
            Err(_) => Ok(()),
        }
    }
}

impl AudioSource for CpalSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frame_size(&self) -> usize {
        self.queue.frame_size()
    }

    fn next_event(&mut self) -> Result<SourceEvent> {
        self.check_errors()?;
        let event = self.queue.next_event()?;
        if matches!(event, SourceEvent::Pending) {
            // A dead device usually shows up as silence from the callback.
            self.check_errors()?;
        }
        Ok(event)
    }
}

/// Everything the realtime callbacks need
struct Capture {
    channels: usize,
    samples: CaptureSender,
    errors: Sender<String>,
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    capture: Capture,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let Capture {
        channels,
        mut samples,
        errors,
    } = capture;

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // Channel 0 of each interleaved frame.
                let mono: Vec<f32> = data
                    .iter()
                    .step_by(channels)
                    .map(|&s| f32::from_sample(s))
                    .collect();
                samples.push(mono);
            },
            move |err| match err {
                cpal::StreamError::DeviceNotAvailable => {
                    error!("Audio input device is no longer available");
                    let _ = errors.try_send("device no longer available".to_string());
                }
                other => warn!("Audio stream error: {}", other),
            },
            None,
        )
        .map_err(|e| CoreError::DeviceUnavailable(e.to_string()))
}

/// Resolve a device selector: `None` is the host default, a number is an
/// index into the input device list, anything else matches by name (exact
/// first, then case-insensitive substring).
fn select_device(host: &cpal::Host, selector: Option<&str>) -> Result<cpal::Device> {
    let Some(selector) = selector else {
        return host
            .default_input_device()
            .ok_or_else(|| CoreError::DeviceNotFound("no default input device".to_string()));
    };

    let devices: Vec<cpal::Device> = host
        .input_devices()
        .map_err(|e| CoreError::DeviceUnavailable(format!("cannot enumerate devices: {}", e)))?
        .collect();

    if let Ok(index) = selector.trim().parse::<usize>() {
        return devices.into_iter().nth(index).ok_or_else(|| {
            CoreError::DeviceNotFound(format!("input device index {} is out of range", index))
        });
    }

    let mut named: Vec<(String, cpal::Device)> = devices
        .into_iter()
        .filter_map(|d| d.name().ok().map(|n| (n, d)))
        .collect();

    let wanted = selector.to_lowercase();
    let position = named
        .iter()
        .position(|(name, _)| name == selector)
        .or_else(|| {
            named
                .iter()
                .position(|(name, _)| name.to_lowercase().contains(&wanted))
        });

    match position {
        Some(i) => Ok(named.swap_remove(i).1),
        None => Err(CoreError::DeviceNotFound(format!(
            "no input device matches '{}'",
            selector
        ))),
    }
}

/// Prefer the fewest channels at the requested rate, otherwise the device default.
fn choose_stream_config(
    device: &cpal::Device,
    sample_rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = device
        .supported_input_configs()
        .map_err(|e| CoreError::DeviceUnavailable(e.to_string()))?
        .collect();

    if ranges.is_empty() {
        return Err(CoreError::DeviceUnavailable(
            "device has no input channels".to_string(),
        ));
    }

    let at_rate = ranges
        .into_iter()
        .filter(|r| r.min_sample_rate().0 <= sample_rate && r.max_sample_rate().0 >= sample_rate)
        .min_by_key(|r| r.channels());

    match at_rate {
        Some(range) => Ok(range.with_sample_rate(cpal::SampleRate(sample_rate))),
        None => device
            .default_input_config()
            .map_err(|e| CoreError::DeviceUnavailable(e.to_string())),
    }
}

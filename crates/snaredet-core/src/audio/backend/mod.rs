//! Capture backends

#[cfg(feature = "audio")]
pub mod cpal_backend;
pub mod mock;

use serde::Serialize;

/// Description of an input device, as shown by `--list-devices`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioDeviceInfo {
    /// Position in the host's input device list
    pub index: usize,
    /// Device name reported by the host
    pub name: String,
    /// True for the host's default input
    pub is_default: bool,
    /// Input channels of the default configuration
    pub channels: u16,
    /// Sample rate of the default configuration
    pub default_sample_rate: u32,
}

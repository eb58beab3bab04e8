//! Audio source capability.
//!
//! The capture loop talks to input hardware only through [`AudioHost`] and
//! [`CaptureStream`]. Implementations:
//!
//! - [`CpalHost`]: microphone capture through CPAL with a lock-free buffer pool
//! - [`SyntheticHost`]: deterministic tone + noise devices for tests and demos
//! - [`WavFileHost`]: a WAV file played back as a single input device

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AudioError;

pub mod buffer_pool;
pub mod cpal_host;
pub mod synthetic;
pub mod wav;

pub use cpal_host::CpalHost;
pub use synthetic::{SyntheticDevice, SyntheticHost};
pub use wav::WavFileHost;

/// One input device as reported by enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: usize,
    pub name: String,
    pub max_input_channels: u16,
    pub default_sample_rate: u32,
}

/// Parameters for opening a capture stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    /// `None` selects the host's default input device
    pub device_id: Option<usize>,
    pub sample_rate: u32,
    pub block_size: usize,
    /// Blocks pre-allocated for hosts that buffer between threads
    pub buffer_blocks: usize,
}

/// Result of one [`CaptureStream::read`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureRead {
    /// The block was filled
    Filled,
    /// No block arrived within the timeout; the caller may retry
    TimedOut,
}

/// Enumeration and opening of input devices
pub trait AudioHost: Send + Sync {
    fn enumerate(&self) -> Result<Vec<DeviceInfo>, AudioError>;

    /// Device used when a start request names none
    fn default_device(&self) -> Result<DeviceInfo, AudioError> {
        self.enumerate()?
            .into_iter()
            .next()
            .ok_or_else(|| AudioError::DeviceUnavailable {
                reason: "no input devices available".to_string(),
            })
    }

    /// Open and start a mono capture stream
    ///
    /// Called on the capture thread; the returned stream never leaves it.
    fn open(&self, request: &CaptureRequest) -> Result<Box<dyn CaptureStream>, AudioError>;
}

/// A started mono input stream
pub trait CaptureStream {
    fn device(&self) -> &DeviceInfo;

    /// Fill `block` with the next `block.len()` samples
    ///
    /// Waits at most `timeout` so the caller can observe a stop request.
    fn read(&mut self, block: &mut [f32], timeout: Duration) -> Result<CaptureRead, AudioError>;

    /// Stop the stream and release the device
    fn close(&mut self);
}

/// Resolve a requested device id against an enumeration
pub(crate) fn find_device(
    devices: &[DeviceInfo],
    device_id: usize,
) -> Result<DeviceInfo, AudioError> {
    devices
        .iter()
        .find(|device| device.id == device_id)
        .cloned()
        .ok_or_else(|| AudioError::DeviceUnavailable {
            reason: format!("no input device with id {}", device_id),
        })
}

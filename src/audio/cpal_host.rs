//! CPAL microphone capture for desktop platforms (Linux, macOS, Windows).
//!
//! Device ids are indices into the host's input device list. The input
//! callback takes channel 0 of the interleaved buffer and assembles
//! fixed-size blocks in a [`BlockPool`]; the capture loop pops them.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::buffer_pool::{BlockPool, BlockReader, BlockWriter};
use super::{find_device, AudioHost, CaptureRead, CaptureRequest, CaptureStream, DeviceInfo};
use crate::error::AudioError;

/// Audio host backed by the platform default CPAL host
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalHost;

impl CpalHost {
    pub fn new() -> Self {
        Self
    }

    fn input_devices() -> Result<Vec<cpal::Device>, AudioError> {
        let host = cpal::default_host();
        host.input_devices()
            .map(|devices| devices.collect())
            .map_err(|e| AudioError::DeviceEnumerationFailed {
                reason: format!("{}", e),
            })
    }

    fn describe(id: usize, device: &cpal::Device) -> Option<DeviceInfo> {
        let default_config = device.default_input_config().ok()?;
        let max_input_channels = device
            .supported_input_configs()
            .ok()
            .and_then(|configs| configs.map(|c| c.channels()).max())
            .unwrap_or_else(|| default_config.channels());
        if max_input_channels == 0 {
            return None;
        }

        Some(DeviceInfo {
            id,
            name: device.name().unwrap_or_else(|_| format!("Input device {}", id)),
            max_input_channels,
            default_sample_rate: default_config.sample_rate().0,
        })
    }
}

impl AudioHost for CpalHost {
    fn enumerate(&self) -> Result<Vec<DeviceInfo>, AudioError> {
        Ok(Self::input_devices()?
            .iter()
            .enumerate()
            .filter_map(|(id, device)| Self::describe(id, device))
            .collect())
    }

    fn default_device(&self) -> Result<DeviceInfo, AudioError> {
        let host = cpal::default_host();
        let default = host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceUnavailable {
                reason: "No default input device found".to_string(),
            })?;
        let default_name = default.name().ok();

        let devices = self.enumerate()?;
        devices
            .iter()
            .find(|device| Some(&device.name) == default_name.as_ref())
            .or_else(|| devices.first())
            .cloned()
            .ok_or_else(|| AudioError::DeviceUnavailable {
                reason: "No input devices available".to_string(),
            })
    }

    fn open(&self, request: &CaptureRequest) -> Result<Box<dyn CaptureStream>, AudioError> {
        let info = match request.device_id {
            Some(id) => find_device(&self.enumerate()?, id)?,
            None => self.default_device()?,
        };
        let device = Self::input_devices()?
            .into_iter()
            .nth(info.id)
            .ok_or_else(|| AudioError::DeviceUnavailable {
                reason: format!("input device {} disappeared", info.id),
            })?;

        let default_config =
            device
                .default_input_config()
                .map_err(|e| AudioError::DeviceUnavailable {
                    reason: format!("Failed to get default input config: {:?}", e),
                })?;
        let channels = default_config.channels();
        let stream_config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(request.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (writer, reader) = BlockPool::new(request.buffer_blocks, request.block_size);
        let stream_error = Arc::new(Mutex::new(None));
        let stream = build_input_stream(
            &device,
            &stream_config,
            default_config.sample_format(),
            writer,
            Arc::clone(&stream_error),
        )?;

        stream.play().map_err(|e| AudioError::DeviceUnavailable {
            reason: format!("Input start failed: {}", e),
        })?;

        log::info!(
            "[CpalHost] Opened '{}' at {} Hz, {} channel(s), block {}",
            info.name,
            request.sample_rate,
            channels,
            request.block_size
        );

        Ok(Box::new(CpalCaptureStream {
            info: DeviceInfo {
                default_sample_rate: request.sample_rate,
                ..info
            },
            stream: Some(stream),
            reader,
            stream_error,
        }))
    }
}

fn build_input_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    format: cpal::SampleFormat,
    mut writer: BlockWriter,
    stream_error: Arc<Mutex<Option<String>>>,
) -> Result<cpal::Stream, AudioError> {
    let channels = config.channels as usize;
    let err_fn = move |err: cpal::StreamError| {
        log::error!("[CpalHost] Input stream error: {}", err);
        if let Ok(mut slot) = stream_error.lock() {
            *slot = Some(err.to_string());
        }
    };

    let stream = match format {
        cpal::SampleFormat::F32 => device.build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                writer.push_interleaved(data, channels, |s| s);
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                writer.push_interleaved(data, channels, |s| s as f32 / i16::MAX as f32);
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::U16 => device.build_input_stream(
            config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                writer.push_interleaved(data, channels, |s| {
                    (s as f32 - 32_768.0) / 32_768.0
                });
            },
            err_fn,
            None,
        ),
        other => {
            return Err(AudioError::DeviceUnavailable {
                reason: format!("Unsupported input sample format {:?}", other),
            })
        }
    }
    .map_err(|e| AudioError::DeviceUnavailable {
        reason: format!("{:?}", e),
    })?;

    Ok(stream)
}

struct CpalCaptureStream {
    info: DeviceInfo,
    stream: Option<cpal::Stream>,
    reader: BlockReader,
    stream_error: Arc<Mutex<Option<String>>>,
}

impl CaptureStream for CpalCaptureStream {
    fn device(&self) -> &DeviceInfo {
        &self.info
    }

    fn read(&mut self, block: &mut [f32], timeout: Duration) -> Result<CaptureRead, AudioError> {
        let latched = match self.stream_error.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(reason) = latched {
            return Err(AudioError::CaptureReadError { reason });
        }
        if self.stream.is_none() {
            return Err(AudioError::CaptureReadError {
                reason: "stream closed".to_string(),
            });
        }

        if self.reader.pop_into(block, timeout) {
            Ok(CaptureRead::Filled)
        } else {
            Ok(CaptureRead::TimedOut)
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
            drop(stream);
            log::info!(
                "[CpalHost] Closed '{}' ({} samples dropped on overrun)",
                self.info.name,
                self.reader.overruns()
            );
        }
    }
}

impl Drop for CpalCaptureStream {
    fn drop(&mut self) {
        self.close();
    }
}

//! WAV file played back as a single input device.
//!
//! Used by the offline `analyze` command: the file is decoded once with
//! `hound`, mixed down to mono and handed out block by block. The final
//! block is zero-padded and the next read reports end of stream.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::{AudioHost, CaptureRead, CaptureRequest, CaptureStream, DeviceInfo};
use crate::error::AudioError;

/// Reason reported once the file is exhausted
pub const END_OF_STREAM: &str = "end of stream";

pub struct WavFileHost {
    path: PathBuf,
    samples: Arc<Vec<f32>>,
    sample_rate: u32,
    channels: u16,
}

impl WavFileHost {
    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Self, AudioError> {
        let path = path.as_ref().to_path_buf();
        let (samples, sample_rate, channels) = read_wav_mono(&path)?;
        log::info!(
            "[WavFileHost] Loaded {} ({} Hz, {} channel(s), {:.2}s)",
            path.display(),
            sample_rate,
            channels,
            samples.len() as f64 / sample_rate.max(1) as f64
        );
        Ok(Self {
            path,
            samples: Arc::new(samples),
            sample_rate,
            channels,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            id: 0,
            name: self
                .path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.path.display().to_string()),
            max_input_channels: self.channels,
            default_sample_rate: self.sample_rate,
        }
    }
}

impl AudioHost for WavFileHost {
    fn enumerate(&self) -> Result<Vec<DeviceInfo>, AudioError> {
        Ok(vec![self.info()])
    }

    fn open(&self, request: &CaptureRequest) -> Result<Box<dyn CaptureStream>, AudioError> {
        if let Some(id) = request.device_id {
            if id != 0 {
                return Err(AudioError::DeviceUnavailable {
                    reason: format!("WAV host has a single device, got id {}", id),
                });
            }
        }
        if request.sample_rate != self.sample_rate {
            return Err(AudioError::InvalidParameters {
                reason: format!(
                    "{} is {} Hz, resampling to {} Hz is not supported",
                    self.path.display(),
                    self.sample_rate,
                    request.sample_rate
                ),
            });
        }

        Ok(Box::new(WavStream {
            info: self.info(),
            samples: Arc::clone(&self.samples),
            position: 0,
        }))
    }
}

struct WavStream {
    info: DeviceInfo,
    samples: Arc<Vec<f32>>,
    position: usize,
}

impl CaptureStream for WavStream {
    fn device(&self) -> &DeviceInfo {
        &self.info
    }

    fn read(&mut self, block: &mut [f32], _timeout: Duration) -> Result<CaptureRead, AudioError> {
        if self.position >= self.samples.len() {
            return Err(AudioError::CaptureReadError {
                reason: END_OF_STREAM.to_string(),
            });
        }
        let end = (self.position + block.len()).min(self.samples.len());
        let available = end - self.position;
        block[..available].copy_from_slice(&self.samples[self.position..end]);
        block[available..].fill(0.0);
        self.position = end;
        Ok(CaptureRead::Filled)
    }

    fn close(&mut self) {
        self.position = self.samples.len();
    }
}

/// Whether a capture error is the normal end of a file
pub fn is_end_of_stream(err: &AudioError) -> bool {
    matches!(err, AudioError::CaptureReadError { reason } if reason == END_OF_STREAM)
}

fn read_error(path: &Path, err: hound::Error) -> AudioError {
    AudioError::CaptureReadError {
        reason: format!("error reading {}: {err}", path.display()),
    }
}

fn read_wav_mono(path: &Path) -> Result<(Vec<f32>, u32, u16), AudioError> {
    let mut reader = hound::WavReader::open(path).map_err(|err| AudioError::DeviceUnavailable {
        reason: format!("failed to open {}: {err}", path.display()),
    })?;
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(AudioError::InvalidParameters {
            reason: format!("{} has zero channels", path.display()),
        });
    }

    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|sample| sample.map_err(|err| read_error(path, err)))
            .collect::<Result<Vec<f32>, _>>()?,
        hound::SampleFormat::Int => {
            if !(8..=32).contains(&spec.bits_per_sample) {
                return Err(AudioError::InvalidParameters {
                    reason: format!(
                        "unsupported bits_per_sample={} for {}",
                        spec.bits_per_sample,
                        path.display()
                    ),
                });
            }
            let scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|sample| {
                    sample
                        .map(|v| v as f32 / scale)
                        .map_err(|err| read_error(path, err))
                })
                .collect::<Result<Vec<f32>, _>>()?
        }
    };

    let channels = spec.channels as usize;
    if channels == 1 {
        return Ok((samples, spec.sample_rate, spec.channels));
    }

    let mono = samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    Ok((mono, spec.sample_rate, spec.channels))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(name: &str, channels: u16, frames: &[[i16; 2]]) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "violin_trainer_{}_{}.wav",
            name,
            std::process::id()
        ));
        let spec = hound::WavSpec {
            channels,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for frame in frames {
            for &sample in frame.iter().take(channels as usize) {
                writer.write_sample(sample).unwrap();
            }
        }
        writer.finalize().unwrap();
        path
    }

    fn request(block_size: usize) -> CaptureRequest {
        CaptureRequest {
            device_id: None,
            sample_rate: 8_000,
            block_size,
            buffer_blocks: 2,
        }
    }

    #[test]
    fn test_stereo_is_mixed_to_mono_and_padded() {
        let path = write_wav("stereo", 2, &[[16_384, 0], [16_384, 16_384], [0, 0]]);
        let host = WavFileHost::open_file(&path).unwrap();
        assert_eq!(host.enumerate().unwrap()[0].max_input_channels, 2);

        let mut stream = host.open(&request(4)).unwrap();
        let mut block = [1.0_f32; 4];
        stream.read(&mut block, Duration::ZERO).unwrap();
        assert_eq!(block, [0.25, 0.5, 0.0, 0.0]);

        let err = stream.read(&mut block, Duration::ZERO).unwrap_err();
        assert!(is_end_of_stream(&err));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_sample_rate_mismatch_is_rejected() {
        let path = write_wav("rate", 1, &[[0, 0]; 8]);
        let host = WavFileHost::open_file(&path).unwrap();
        let mut mismatched = request(4);
        mismatched.sample_rate = 44_100;
        assert!(matches!(
            host.open(&mismatched),
            Err(AudioError::InvalidParameters { .. })
        ));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            WavFileHost::open_file("/definitely/not/here.wav"),
            Err(AudioError::DeviceUnavailable { .. })
        ));
    }
}

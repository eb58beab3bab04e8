//! Deterministic synthetic input devices.
//!
//! Each device produces a sine tone plus seeded uniform noise, so runs are
//! reproducible. The host counts opens and closes and can inject failures,
//! which is what the lifecycle tests drive the engine with.

use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::{rngs::StdRng, Rng, SeedableRng};

use super::{find_device, AudioHost, CaptureRead, CaptureRequest, CaptureStream, DeviceInfo};
use crate::error::AudioError;

/// Signal description of one synthetic device
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticDevice {
    pub name: String,
    pub frequency_hz: f32,
    pub amplitude: f32,
    /// Peak of the uniform noise added to the tone
    pub noise_amplitude: f32,
    pub default_sample_rate: u32,
}

impl SyntheticDevice {
    pub fn tone(name: &str, frequency_hz: f32, amplitude: f32) -> Self {
        Self {
            name: name.to_string(),
            frequency_hz,
            amplitude,
            noise_amplitude: 0.0,
            default_sample_rate: 44_100,
        }
    }

    pub fn with_noise(mut self, noise_amplitude: f32) -> Self {
        self.noise_amplitude = noise_amplitude;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.default_sample_rate = sample_rate;
        self
    }
}

#[derive(Default)]
struct HostCounters {
    opens: AtomicU64,
    closes: AtomicU64,
    active: AtomicUsize,
    max_active: AtomicUsize,
    fail_open: AtomicBool,
    /// 0 disables; otherwise reads fail after this many blocks
    fail_after_blocks: AtomicU64,
}

/// Host exposing a fixed list of synthetic devices
///
/// Clones share counters and failure switches.
#[derive(Clone)]
pub struct SyntheticHost {
    devices: Arc<Vec<SyntheticDevice>>,
    counters: Arc<HostCounters>,
    paced: bool,
    seed: u64,
}

impl SyntheticHost {
    pub fn new(devices: Vec<SyntheticDevice>) -> Self {
        Self {
            devices: Arc::new(devices),
            counters: Arc::new(HostCounters::default()),
            paced: false,
            seed: 0x5eed,
        }
    }

    /// Two devices: a quiet room and an A4 tone
    pub fn demo() -> Self {
        Self::new(vec![
            SyntheticDevice::tone("Synthetic Silence", 0.0, 0.0).with_noise(0.0005),
            SyntheticDevice::tone("Synthetic A4", 440.0, 0.3).with_noise(0.001),
        ])
    }

    /// Deliver blocks at the real-time rate instead of as fast as possible
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Make every subsequent `open` fail with `DeviceUnavailable`
    pub fn set_fail_open(&self, fail: bool) {
        self.counters.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make streams opened afterwards fail after `blocks` reads
    pub fn set_fail_after_blocks(&self, blocks: Option<u64>) {
        self.counters
            .fail_after_blocks
            .store(blocks.unwrap_or(0), Ordering::SeqCst);
    }

    pub fn open_count(&self) -> u64 {
        self.counters.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> u64 {
        self.counters.closes.load(Ordering::SeqCst)
    }

    /// Streams currently open
    pub fn active_streams(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open streams seen
    pub fn max_active_streams(&self) -> usize {
        self.counters.max_active.load(Ordering::SeqCst)
    }
}

impl AudioHost for SyntheticHost {
    fn enumerate(&self) -> Result<Vec<DeviceInfo>, AudioError> {
        Ok(self
            .devices
            .iter()
            .enumerate()
            .map(|(id, device)| DeviceInfo {
                id,
                name: device.name.clone(),
                max_input_channels: 1,
                default_sample_rate: device.default_sample_rate,
            })
            .collect())
    }

    fn open(&self, request: &CaptureRequest) -> Result<Box<dyn CaptureStream>, AudioError> {
        if self.counters.fail_open.load(Ordering::SeqCst) {
            return Err(AudioError::DeviceUnavailable {
                reason: "synthetic device refused to open".to_string(),
            });
        }

        let devices = self.enumerate()?;
        let info = match request.device_id {
            Some(id) => find_device(&devices, id)?,
            None => self.default_device()?,
        };
        let signal = self.devices[info.id].clone();

        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        let active = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_active.fetch_max(active, Ordering::SeqCst);

        let fail_after = self.counters.fail_after_blocks.load(Ordering::SeqCst);
        Ok(Box::new(SyntheticStream {
            info: DeviceInfo {
                default_sample_rate: request.sample_rate,
                ..info
            },
            signal,
            sample_rate: request.sample_rate.max(1),
            rng: StdRng::seed_from_u64(self.seed.wrapping_add(request.device_id.unwrap_or(0) as u64)),
            phase: 0.0,
            blocks_read: 0,
            fail_after: (fail_after > 0).then_some(fail_after),
            paced: self.paced,
            next_due: None,
            counters: Arc::clone(&self.counters),
            closed: false,
        }))
    }
}

struct SyntheticStream {
    info: DeviceInfo,
    signal: SyntheticDevice,
    sample_rate: u32,
    rng: StdRng,
    phase: f32,
    blocks_read: u64,
    fail_after: Option<u64>,
    paced: bool,
    next_due: Option<Instant>,
    counters: Arc<HostCounters>,
    closed: bool,
}

impl SyntheticStream {
    /// Sleep until the next block is due; false if that exceeds `timeout`
    fn wait_for_block(&mut self, block_len: usize, timeout: Duration) -> bool {
        if !self.paced {
            return true;
        }
        let now = Instant::now();
        let due = *self.next_due.get_or_insert(now);
        if due > now {
            let wait = due - now;
            if wait > timeout {
                std::thread::sleep(timeout);
                return false;
            }
            std::thread::sleep(wait);
        }
        let block_duration = Duration::from_secs_f64(block_len as f64 / self.sample_rate as f64);
        self.next_due = Some(due + block_duration);
        true
    }
}

impl CaptureStream for SyntheticStream {
    fn device(&self) -> &DeviceInfo {
        &self.info
    }

    fn read(&mut self, block: &mut [f32], timeout: Duration) -> Result<CaptureRead, AudioError> {
        if self.closed {
            return Err(AudioError::CaptureReadError {
                reason: "stream closed".to_string(),
            });
        }
        if let Some(limit) = self.fail_after {
            if self.blocks_read >= limit {
                return Err(AudioError::CaptureReadError {
                    reason: format!("synthetic failure after {} blocks", limit),
                });
            }
        }
        if !self.wait_for_block(block.len(), timeout) {
            return Ok(CaptureRead::TimedOut);
        }

        let step = 2.0 * PI * self.signal.frequency_hz / self.sample_rate as f32;
        for sample in block.iter_mut() {
            let noise = if self.signal.noise_amplitude > 0.0 {
                self.rng
                    .gen_range(-self.signal.noise_amplitude..=self.signal.noise_amplitude)
            } else {
                0.0
            };
            *sample = self.signal.amplitude * self.phase.sin() + noise;
            self.phase = (self.phase + step) % (2.0 * PI);
        }

        self.blocks_read += 1;
        Ok(CaptureRead::Filled)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
            self.counters.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        self.close();
    }
}

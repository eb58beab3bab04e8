// NoiseConfigManager: Config Store for the noise conditioning settings
// Single Responsibility: atomic read/replace of NoiseConfig

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::analysis::noise::NoiseConfig;
use crate::error::{log_config_error, ConfigError};

/// Shared, lock-guarded NoiseConfig
///
/// The whole config is replaced under one write lock and read as one copy,
/// so the capture loop never sees a mix of two configs. Clones share state.
#[derive(Clone)]
pub struct NoiseConfigManager {
    config: Arc<RwLock<NoiseConfig>>,
    /// Sample rate of the running session, 0 when stopped
    active_sample_rate: Arc<AtomicU32>,
    version: Arc<AtomicU64>,
}

impl NoiseConfigManager {
    pub fn new(initial: NoiseConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(initial)),
            active_sample_rate: Arc::new(AtomicU32::new(0)),
            version: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Snapshot copy of the current config
    pub fn get(&self) -> NoiseConfig {
        match self.config.read() {
            Ok(guard) => *guard,
            // NoiseConfig is Copy and always written whole
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Validate and atomically replace the config
    ///
    /// Rejected configs leave the current one untouched. The running
    /// session picks up new filter coefficients on its next block.
    pub fn set(&self, new_config: NoiseConfig) -> Result<NoiseConfig, ConfigError> {
        let sample_rate = self.active_sample_rate.load(Ordering::SeqCst);
        let validation = if sample_rate > 0 {
            new_config.validate_for_sample_rate(sample_rate)
        } else {
            new_config.validate()
        };
        if let Err(err) = validation {
            log_config_error(&err, "set_noise_config");
            return Err(err);
        }

        self.replace(|_| new_config);
        log::info!(
            "[NoiseConfigManager] Config updated: enabled={} adaptive={} effective_gate={:.1} dB hp={}@{:.0} Hz",
            new_config.enabled,
            new_config.adaptive,
            new_config.effective_gate_db(),
            new_config.high_pass_enabled,
            new_config.high_pass_cutoff_hz,
        );
        Ok(new_config)
    }

    /// Write a calibrated noise floor as one read-modify-write
    pub fn apply_noise_floor(&self, noise_floor_db: f32) -> NoiseConfig {
        self.replace(|current| current.with_noise_floor(noise_floor_db))
    }

    /// Number of successful replacements since creation
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub(crate) fn bind_sample_rate(&self, sample_rate: u32) {
        self.active_sample_rate.store(sample_rate, Ordering::SeqCst);
    }

    pub(crate) fn clear_sample_rate(&self) {
        self.active_sample_rate.store(0, Ordering::SeqCst);
    }

    fn replace(&self, update: impl FnOnce(NoiseConfig) -> NoiseConfig) -> NoiseConfig {
        let mut guard = match self.config.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next = update(*guard);
        *guard = next;
        self.version.fetch_add(1, Ordering::SeqCst);
        next
    }
}

impl Default for NoiseConfigManager {
    fn default() -> Self {
        Self::new(NoiseConfig::default())
    }
}

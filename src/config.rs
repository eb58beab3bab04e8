//! Configuration management for the capture pipeline
//!
//! This module provides runtime configuration loading from JSON files,
//! enabling tuning of stream defaults, preview cadence and the initial
//! noise-conditioning settings without recompilation.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::analysis::noise::NoiseConfig;

/// Environment variable pointing at an alternative config file
pub const CONFIG_PATH_ENV: &str = "VIOLIN_CONFIG";

/// Environment variable overriding the HTTP bind address
pub const HTTP_ADDR_ENV: &str = "VIOLIN_HTTP_ADDR";

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub noise: NoiseConfig,
    pub stream: StreamConfig,
    pub http: HttpConfig,
}

/// Capture session defaults and limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate used when neither the request nor the device provides one
    pub default_sample_rate: u32,
    /// Block size used when the start request omits one
    pub default_block_size: usize,
    /// Smallest accepted block size in samples
    pub min_block_size: usize,
    /// Largest accepted block size in samples
    pub max_block_size: usize,
    /// Number of pre-allocated blocks in the capture buffer pool
    pub buffer_pool_size: usize,
    /// Bounded wait for the capture worker to exit on stop
    pub stop_timeout_ms: u64,
    /// Log block statistics every N blocks
    pub log_every_n_blocks: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            default_sample_rate: 44_100,
            default_block_size: 1024,
            min_block_size: 64,
            max_block_size: 16_384,
            buffer_pool_size: 32,
            stop_timeout_ms: 2000,
            log_every_n_blocks: 200,
        }
    }
}

/// Subscriber fan-out settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Attach a waveform preview to every Nth frame
    pub preview_every_n_frames: u64,
    /// Number of points in the waveform preview
    pub preview_points: usize,
    /// Per-subscriber queue depth before frames are dropped for that subscriber
    pub subscriber_queue: usize,
    /// Start a default session when the first subscriber joins
    pub autostart_on_subscribe: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            preview_every_n_frames: 4,
            preview_points: 128,
            subscriber_queue: 64,
            autostart_on_subscribe: true,
        }
    }
}

/// HTTP control surface settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind_addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The parsed configuration, or defaults if the file is missing or invalid
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    Self::validated(config)
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Replace an invalid noise section with defaults
    pub fn validated(mut self) -> Self {
        if let Err(err) = self.noise.validate() {
            log::warn!(
                "[Config] Invalid noise configuration: {}. Using defaults.",
                err
            );
            self.noise = NoiseConfig::default();
        }
        self
    }

    /// Load configuration from `$VIOLIN_CONFIG` or `violin_config.json`
    pub fn load() -> Self {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "violin_config.json".to_string());
        let mut config = Self::load_from_file(path);
        if let Ok(addr) = std::env::var(HTTP_ADDR_ENV) {
            config.http.bind_addr = addr;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.audio.default_sample_rate, 44_100);
        assert_eq!(config.audio.default_block_size, 1024);
        assert_eq!(config.stream.preview_every_n_frames, 4);
        assert_eq!(config.stream.preview_points, 128);
        assert_eq!(config.noise.gate_threshold_db, -50.0);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let parsed: AppConfig =
            serde_json::from_str(r#"{ "audio": { "default_block_size": 512 } }"#).unwrap();
        assert_eq!(parsed.audio.default_block_size, 512);
        assert_eq!(parsed.audio.default_sample_rate, 44_100);
        assert!(parsed.stream.autostart_on_subscribe);
    }

    #[test]
    fn test_invalid_noise_section_falls_back_to_defaults() {
        let path = std::env::temp_dir().join(format!(
            "violin-config-invalid-noise-{}.json",
            std::process::id()
        ));
        fs::write(
            &path,
            r#"{ "audio": { "default_block_size": 512 }, "noise": { "hp_cut_hz": 0.0, "gate_db": -30.0 } }"#,
        )
        .unwrap();

        let config = AppConfig::load_from_file(&path);
        let _ = fs::remove_file(&path);

        assert_eq!(config.noise, NoiseConfig::default());
        assert_eq!(config.audio.default_block_size, 512);
    }

    #[test]
    fn test_validated_keeps_valid_noise_section() {
        let mut config = AppConfig::default();
        config.noise.gate_threshold_db = -35.0;
        assert_eq!(config.validated().noise.gate_threshold_db, -35.0);

        let mut config = AppConfig::default();
        config.noise.margin_db = f32::NAN;
        assert_eq!(config.validated().noise, NoiseConfig::default());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = AppConfig::load_from_file("/nonexistent/violin_config.json");
        assert_eq!(config.http.bind_addr, "127.0.0.1:8000");
    }
}

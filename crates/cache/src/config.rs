//! Cache configuration
//!
//! The budget, eviction policy and gradient dithering switch can be loaded
//! from a file, from environment variables, or built programmatically.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::backend::EvictionPolicy;

/// Default budget: 8 MB
const DEFAULT_MAX_SIZE: usize = 8 * 1024 * 1024;

/// Configuration for a cache instance.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Budget in bytes for non-temporary entries
    pub max_size: usize,
    /// How entries age on access
    pub eviction_policy: EvictionPolicy,
    /// Whether gradient ramps carry the high-bit-depth map and dither
    /// accumulator
    pub gradient_dither: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            eviction_policy: EvictionPolicy::default(),
            gradient_dither: false,
        }
    }
}

impl CacheConfig {
    /// Creates a configuration with a budget in kilobytes.
    ///
    /// # Arguments
    /// * `max_kb` - Budget in kilobytes
    /// * `policy` - Eviction policy
    pub fn new(max_kb: usize, policy: EvictionPolicy) -> Self {
        Self {
            max_size: max_kb * 1024,
            eviction_policy: policy,
            ..Default::default()
        }
    }

    /// Sets the budget in kilobytes.
    pub fn with_max_kb(mut self, kb: usize) -> Self {
        self.max_size = kb * 1024;
        self
    }

    /// Sets the budget in bytes.
    pub fn with_max_size(mut self, bytes: usize) -> Self {
        self.max_size = bytes;
        self
    }

    pub fn with_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    pub fn with_dither(mut self, dither: bool) -> Self {
        self.gradient_dither = dither;
        self
    }

    /// Returns the default configuration file path for the current platform.
    ///
    /// - macOS: ~/Library/Application Support/draw-cache/cache.toml
    /// - Linux: ~/.config/draw-cache/cache.toml
    /// - Windows: %APPDATA%\draw-cache\cache.toml
    pub fn default_config_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("draw-cache").join("cache.toml")
        } else {
            PathBuf::from("draw-cache.toml")
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `DRAW_CACHE_MAX_KB`: budget in KB (default: 8192)
    /// - `DRAW_CACHE_POLICY`: `life`, `lru` or `sc` (default: `life`)
    /// - `DRAW_CACHE_DITHER`: `true`/`false`/`1`/`0` (default: false)
    ///
    /// # Errors
    /// Returns an error if any environment variable contains an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("DRAW_CACHE_MAX_KB") {
            config.max_size = parse_kb("DRAW_CACHE_MAX_KB", &val)?;
        }

        if let Ok(val) = std::env::var("DRAW_CACHE_POLICY") {
            config.eviction_policy = parse_policy("DRAW_CACHE_POLICY", &val)?;
        }

        if let Ok(val) = std::env::var("DRAW_CACHE_DITHER") {
            config.gradient_dither = parse_bool("DRAW_CACHE_DITHER", &val)?;
        }

        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Expected file format:
    /// ```toml
    /// max_cache_kb = 8192
    /// eviction_policy = "life"
    /// gradient_dither = false
    /// ```
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;

        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string.
    fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for line in toml_str.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim().trim_matches('"');

                match key {
                    "max_cache_kb" => config.max_size = parse_kb(key, value)?,
                    "eviction_policy" => config.eviction_policy = parse_policy(key, value)?,
                    "gradient_dither" => config.gradient_dither = parse_bool(key, value)?,
                    _ => {} // Ignore unknown keys
                }
            }
        }

        Ok(config)
    }

    /// Saves configuration to a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path.as_ref(), self.to_toml())?;
        Ok(())
    }

    /// Converts configuration to TOML format.
    fn to_toml(&self) -> String {
        format!(
            "# Draw cache configuration\n\
             max_cache_kb = {}\n\
             eviction_policy = \"{}\"\n\
             gradient_dither = {}\n",
            self.max_kb(),
            self.eviction_policy.name(),
            self.gradient_dither
        )
    }

    /// Returns the budget in kilobytes.
    pub fn max_kb(&self) -> usize {
        self.max_size / 1024
    }
}

fn parse_kb(key: &str, value: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|kb| kb.checked_mul(1024))
        .ok_or_else(|| ConfigError::InvalidValue(key.to_string()))
}

fn parse_policy(key: &str, value: &str) -> Result<EvictionPolicy, ConfigError> {
    EvictionPolicy::from_name(value).ok_or_else(|| ConfigError::InvalidValue(key.to_string()))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue(key.to_string())),
    }
}

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),
    /// I/O error reading or writing configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

//! Configuration management for fbhwc
//!
//! This module handles loading, parsing, and validating configuration
//! from TOML files. It covers device node locations, the composition
//! policy flags, the vsync source and display defaults.
//!
//! The composition policy is also exposed at runtime through [`Policy`],
//! whose flags may be flipped while frames are flowing; the classifier
//! samples them on every call.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Main configuration struct containing all fbhwc settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HwcConfig {
    /// Device node locations
    #[serde(default)]
    pub devices: DeviceConfig,

    /// Composition policy flags
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Vsync timing source settings
    #[serde(default)]
    pub vsync: VsyncConfig,

    /// Display defaults
    #[serde(default)]
    pub display: DisplayConfig,
}

/// Device node paths
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    /// Primary framebuffer device
    pub primary: PathBuf,

    /// Video/overlay plane device, opened lazily on the first overlay layer
    pub video: PathBuf,

    /// Kernel file exposing vsync timestamps as ASCII integers
    pub vsync_timestamp: PathBuf,
}

/// Composition policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyConfig {
    /// Present decoder output on the video plane instead of converting it
    pub use_overlay: bool,

    /// Log the composition frame rate every 500ms
    pub log_fps: bool,
}

/// Vsync timing source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VsyncConfig {
    /// Synthesize ticks instead of reading the kernel timestamp file
    pub fake: bool,

    /// Log every delivered tick
    pub log_ticks: bool,

    /// Refresh rate (Hz) of the synthetic clock and the reported vsync period
    pub refresh_rate: u32,
}

/// Display defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DisplayConfig {
    /// DPI assumed when the driver does not report a physical size
    pub default_dpi: f32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            primary: PathBuf::from("/dev/graphics/fb0"),
            video: PathBuf::from("/dev/graphics/fb1"),
            vsync_timestamp: PathBuf::from("/sys/class/graphics/fb0/vsync"),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            use_overlay: false,
            log_fps: false,
        }
    }
}

impl Default for VsyncConfig {
    fn default() -> Self {
        Self {
            fake: false,
            log_ticks: false,
            refresh_rate: 60,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { default_dpi: 160.0 }
    }
}

impl VsyncConfig {
    /// Vsync period in nanoseconds
    pub fn period_ns(&self) -> u32 {
        1_000_000_000 / self.refresh_rate.max(1)
    }
}

impl HwcConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Expand ~ to home directory
        let expanded_path = if path.to_string_lossy().starts_with('~') {
            let home = std::env::var("HOME").context("Failed to get HOME environment variable")?;
            let rest = path
                .strip_prefix("~")
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| path.to_path_buf());
            Path::new(&home).join(rest)
        } else {
            path.to_path_buf()
        };

        let contents = fs::read_to_string(&expanded_path)
            .with_context(|| format!("Failed to read config file: {}", expanded_path.display()))?;

        let config: HwcConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", expanded_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.vsync.refresh_rate == 0 || self.vsync.refresh_rate > 240 {
            anyhow::bail!(
                "Invalid refresh_rate {}: must be between 1 and 240",
                self.vsync.refresh_rate
            );
        }

        if !self.display.default_dpi.is_finite() || self.display.default_dpi <= 0.0 {
            anyhow::bail!("Invalid default_dpi: must be a positive number");
        }

        for (name, path) in [
            ("primary", &self.devices.primary),
            ("video", &self.devices.video),
            ("vsync_timestamp", &self.devices.vsync_timestamp),
        ] {
            if path.as_os_str().is_empty() {
                anyhow::bail!("Device path `{}` must not be empty", name);
            }
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, contents).context("Failed to write configuration file")?;

        Ok(())
    }

    /// Merge a partial configuration into this one
    /// Sections of the partial config that differ from the defaults override this config
    pub fn merge_partial(mut self, partial: HwcConfig) -> Self {
        let default_config = HwcConfig::default();

        if partial.devices != default_config.devices {
            self.devices = partial.devices;
        }
        if partial.policy != default_config.policy {
            self.policy = partial.policy;
        }
        if partial.vsync != default_config.vsync {
            self.vsync = partial.vsync;
        }
        if partial.display != default_config.display {
            self.display = partial.display;
        }

        self
    }
}

/// Runtime-mutable composition policy.
///
/// Seeded from [`PolicyConfig`]; the flags can be toggled at any time from
/// any thread and take effect on the next classify/program call.
#[derive(Debug, Default)]
pub struct Policy {
    use_overlay: AtomicBool,
    log_fps: AtomicBool,
}

impl Policy {
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            use_overlay: AtomicBool::new(config.use_overlay),
            log_fps: AtomicBool::new(config.log_fps),
        }
    }

    /// Whether decoder output goes to the video plane
    pub fn use_overlay(&self) -> bool {
        self.use_overlay.load(Ordering::Acquire)
    }

    pub fn set_use_overlay(&self, enabled: bool) {
        self.use_overlay.store(enabled, Ordering::Release);
    }

    pub fn log_fps(&self) -> bool {
        self.log_fps.load(Ordering::Relaxed)
    }

    pub fn set_log_fps(&self, enabled: bool) {
        self.log_fps.store(enabled, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests;

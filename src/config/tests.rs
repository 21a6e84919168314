//! Unit tests for configuration module
//!
//! Tests configuration parsing, validation, file handling and the
//! runtime policy view.

use super::*;
use anyhow::Result;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_default_configuration_is_valid() {
    let config = HwcConfig::default();
    assert!(config.validate().is_ok());

    assert!(!config.policy.use_overlay);
    assert!(!config.vsync.fake);
    assert_eq!(config.vsync.refresh_rate, 60);
    assert_eq!(config.devices.primary, PathBuf::from("/dev/graphics/fb0"));
    assert_eq!(config.devices.video, PathBuf::from("/dev/graphics/fb1"));
}

#[test]
fn test_vsync_period_from_refresh_rate() {
    let mut vsync = VsyncConfig::default();
    assert_eq!(vsync.period_ns(), 16_666_666);

    vsync.refresh_rate = 50;
    assert_eq!(vsync.period_ns(), 20_000_000);
}

#[test]
fn test_configuration_from_file() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("fbhwc.toml");
    fs::write(
        &path,
        r#"
[devices]
video = "/dev/graphics/fb2"

[policy]
use_overlay = true

[vsync]
fake = true
refresh_rate = 50
"#,
    )?;

    let config = HwcConfig::load(&path)?;
    assert!(config.policy.use_overlay);
    assert!(!config.policy.log_fps);
    assert!(config.vsync.fake);
    assert_eq!(config.vsync.refresh_rate, 50);
    assert_eq!(config.devices.video, PathBuf::from("/dev/graphics/fb2"));
    // Unspecified keys keep their defaults
    assert_eq!(config.devices.primary, PathBuf::from("/dev/graphics/fb0"));
    assert_eq!(config.display.default_dpi, 160.0);

    Ok(())
}

#[test]
fn test_empty_file_yields_defaults() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("empty.toml");
    fs::write(&path, "")?;

    assert_eq!(HwcConfig::load(&path)?, HwcConfig::default());
    Ok(())
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempdir().unwrap();
    let err = HwcConfig::load(dir.path().join("nope.toml")).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
fn test_malformed_file_is_an_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[vsync\nfake = ").unwrap();

    let err = HwcConfig::load(&path).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
}

#[test]
fn test_invalid_refresh_rate_rejected() {
    let mut config = HwcConfig::default();
    config.vsync.refresh_rate = 0;
    assert!(config.validate().is_err());

    config.vsync.refresh_rate = 500;
    assert!(config.validate().is_err());
}

#[test]
fn test_invalid_dpi_rejected() {
    let mut config = HwcConfig::default();
    config.display.default_dpi = 0.0;
    assert!(config.validate().is_err());

    config.display.default_dpi = f32::NAN;
    assert!(config.validate().is_err());
}

#[test]
fn test_empty_device_path_rejected() {
    let mut config = HwcConfig::default();
    config.devices.vsync_timestamp = PathBuf::new();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("vsync_timestamp"));
}

#[test]
fn test_save_and_reload() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("saved.toml");

    let mut config = HwcConfig::default();
    config.policy.log_fps = true;
    config.vsync.log_ticks = true;
    config.save(&path)?;

    assert_eq!(HwcConfig::load(&path)?, config);
    Ok(())
}

#[test]
fn test_merge_partial_overrides_changed_sections() {
    let base = HwcConfig::default();
    let mut partial = HwcConfig::default();
    partial.policy.use_overlay = true;

    let merged = base.merge_partial(partial);
    assert!(merged.policy.use_overlay);
    assert_eq!(merged.vsync, VsyncConfig::default());
    assert_eq!(merged.devices, DeviceConfig::default());
}

#[test]
fn test_runtime_policy_follows_config_and_toggles() {
    let policy = Policy::new(&PolicyConfig {
        use_overlay: true,
        log_fps: false,
    });
    assert!(policy.use_overlay());
    assert!(!policy.log_fps());

    policy.set_use_overlay(false);
    policy.set_log_fps(true);
    assert!(!policy.use_overlay());
    assert!(policy.log_fps());
}

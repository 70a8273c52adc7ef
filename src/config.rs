// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::camera::{PipelineConfig, Resolution};
use crate::backends::usb::DeviceFilter;
use crate::constants::{
    CONFIG_DIR_NAME, CONFIG_FILE_NAME, EncoderType, PreviewFormat, USB_CLASS_MISC,
};
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Preview resolution used until `change_resolution` is called
    pub resolution: Resolution,
    /// Pixel format requested from the device
    pub preview_format: PreviewFormat,
    /// Encoder strategy for recordings
    pub encoder: EncoderType,
    /// Devices the session is interested in; the first entry drives lookups
    pub device_filters: Vec<DeviceFilter>,
    /// Give up on a permission request after this many milliseconds.
    /// `None` waits indefinitely for the OS to answer.
    pub permission_timeout_ms: Option<u64>,
    /// Where stills and recordings go when the caller gives no path
    pub capture_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            preview_format: PreviewFormat::default(),
            encoder: EncoderType::default(),
            // UVC cameras advertise themselves through an interface association
            device_filters: vec![DeviceFilter::with_class(USB_CLASS_MISC, Some(2), None)],
            permission_timeout_ms: None,
            capture_dir: None,
        }
    }
}

impl SessionConfig {
    /// `<config dir>/usb-camera/config.json`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Read a configuration file; missing keys take their default value
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: SessionConfig = serde_json::from_str(&text)?;
        info!(path = %path.display(), "Loaded session configuration");
        Ok(config)
    }

    /// Like [`SessionConfig::load`], but a missing file yields the defaults
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No configuration file, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    pub fn permission_timeout(&self) -> Option<Duration> {
        self.permission_timeout_ms.map(Duration::from_millis)
    }

    /// Pipeline settings at a given resolution
    pub fn pipeline_config(&self, resolution: Resolution) -> PipelineConfig {
        PipelineConfig {
            resolution,
            preview_format: self.preview_format,
            encoder: self.encoder,
        }
    }
}

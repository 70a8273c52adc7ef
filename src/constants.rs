// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Preview width used until the caller asks for something else
pub const DEFAULT_PREVIEW_WIDTH: u32 = 640;
/// Preview height used until the caller asks for something else
pub const DEFAULT_PREVIEW_HEIGHT: u32 = 480;

/// File suffix for captured stills
pub const SUFFIX_PNG: &str = ".png";
/// File suffix for recordings
pub const SUFFIX_MP4: &str = ".mp4";

/// Prefix for generated still file names
pub const PICTURE_PREFIX: &str = "picture";
/// Prefix for generated recording file names
pub const VIDEO_PREFIX: &str = "video";

/// Name of the per-user configuration directory
pub const CONFIG_DIR_NAME: &str = "usb-camera";
/// Configuration file inside [`CONFIG_DIR_NAME`]
pub const CONFIG_FILE_NAME: &str = "config.json";

/// USB class code for devices that describe their function per interface
/// (UVC cameras with an interface association descriptor report this)
pub const USB_CLASS_MISC: u8 = 0xEF;
/// USB class code for video devices
pub const USB_CLASS_VIDEO: u8 = 0x0E;

/// Delay between scripted hot-plug events in the simulator
pub const SIMULATED_EVENT_DELAY: Duration = Duration::from_millis(50);

/// Pixel format requested from the device for preview
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PreviewFormat {
    /// Uncompressed YUY2 (widest device support, default)
    #[default]
    Yuyv,
    /// Motion JPEG (higher resolutions over USB 2.0)
    Mjpeg,
}

impl PreviewFormat {
    /// Format code understood by UVC backends (0 = YUYV, 1 = MJPEG)
    pub fn code(&self) -> u32 {
        match self {
            PreviewFormat::Yuyv => 0,
            PreviewFormat::Mjpeg => 1,
        }
    }
}

impl std::fmt::Display for PreviewFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreviewFormat::Yuyv => write!(f, "YUYV"),
            PreviewFormat::Mjpeg => write!(f, "MJPEG"),
        }
    }
}

/// Encoder strategy used by the pipeline when recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EncoderType {
    /// Encode from the preview surface
    Surface,
    /// Encode from decoded frames
    Video,
    /// Encode from raw frame buffers (default)
    #[default]
    VideoBuffer,
}

impl EncoderType {
    pub const ALL: [EncoderType; 3] = [
        EncoderType::Surface,
        EncoderType::Video,
        EncoderType::VideoBuffer,
    ];

    /// Numeric code understood by UVC backends
    pub fn code(&self) -> u32 {
        match self {
            EncoderType::Surface => 0,
            EncoderType::Video => 1,
            EncoderType::VideoBuffer => 2,
        }
    }
}

/// Application information utilities
pub mod app_info {
    /// Get the application version from build-time environment
    pub fn version() -> &'static str {
        env!("GIT_VERSION")
    }
}

// SPDX-License-Identifier: GPL-3.0-only
// Shared types for camera pipeline abstraction

//! Shared types for camera pipelines

use crate::constants::{DEFAULT_PREVIEW_HEIGHT, DEFAULT_PREVIEW_WIDTH, EncoderType, PreviewFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Preview resolution in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width divided by height, as handed to the render target
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            return 0.0;
        }
        self.width as f64 / self.height as f64
    }

    /// A resolution with a zero dimension cannot be negotiated with any device
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(DEFAULT_PREVIEW_WIDTH, DEFAULT_PREVIEW_HEIGHT)
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl std::str::FromStr for Resolution {
    type Err = String;

    /// Parse "WIDTHxHEIGHT" (also accepts 'X' and '*' as separators)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X', '*'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;

        let width = w
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid width '{}': {}", w, e))?;
        let height = h
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid height '{}': {}", h, e))?;

        let resolution = Resolution::new(width, height);
        if !resolution.is_valid() {
            return Err(format!("resolution must be non-zero, got '{}'", s));
        }
        Ok(resolution)
    }
}

/// Everything a backend needs to build one camera pipeline instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineConfig {
    pub resolution: Resolution,
    pub preview_format: PreviewFormat,
    pub encoder: EncoderType,
}

/// Rendering surface the preview is drawn into
///
/// Implemented by the UI layer. The session only tells it which aspect ratio
/// to lay out for and hands it to the pipeline when preview starts.
pub trait RenderTarget: Send + Sync {
    /// Stable identifier of the underlying surface (used for logging)
    fn surface_id(&self) -> u64;

    /// Called before a pipeline is built so the view can match the stream
    fn set_aspect_ratio(&self, ratio: f64);
}

/// Parameters for a recording session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordParams {
    /// Where the encoded file is written
    pub output_path: PathBuf,
    /// Stop automatically after this long (None = until stopped)
    pub duration: Option<Duration>,
    /// Capture the device's microphone alongside video
    pub record_audio: bool,
}

impl RecordParams {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            duration: None,
            record_audio: false,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_audio(mut self, record_audio: bool) -> Self {
        self.record_audio = record_audio;
        self
    }
}

/// Kind of an encoded chunk produced while recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodedKind {
    Video,
    Audio,
}

/// One chunk of encoder output
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    pub kind: EncodedKind,
    pub data: Vec<u8>,
    /// Presentation timestamp in microseconds
    pub timestamp_us: u64,
}

/// Receives encoder output for an active recording
pub trait RecordingListener: Send + Sync {
    /// Raw encoder output, for callers that stream while recording
    fn on_encode_result(&self, _chunk: &EncodedChunk) {}

    /// The recording was finalized at `path`
    fn on_record_result(&self, path: &Path);
}

/// Result type for camera and monitor adapters
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors reported by backend adapters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Backend is not available on this system
    NotAvailable(String),
    /// Device could not be opened with the given control block
    OpenFailed(String),
    /// Camera device not found
    DeviceNotFound(String),
    /// The pipeline is not open
    NotOpened,
    /// Recording already in progress
    RecordingInProgress,
    /// No recording in progress
    NoRecordingInProgress,
    /// General I/O error
    IoError(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::NotAvailable(msg) => write!(f, "Backend not available: {}", msg),
            BackendError::OpenFailed(msg) => write!(f, "Failed to open device: {}", msg),
            BackendError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            BackendError::NotOpened => write!(f, "Camera is not opened"),
            BackendError::RecordingInProgress => write!(f, "Recording already in progress"),
            BackendError::NoRecordingInProgress => write!(f, "No recording in progress"),
            BackendError::IoError(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::IoError(err.to_string())
    }
}

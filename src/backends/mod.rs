// SPDX-License-Identifier: GPL-3.0-only

//! Backend abstraction layer for USB cameras
//!
//! This module defines the collaborators the session core drives:
//! - USB hot-plug monitoring and device lookup
//! - Camera pipelines (open, preview, capture, record)
//! - A simulated backend that implements both in memory
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               SessionManager                │
//! └────────────────────┬────────────────────────┘
//!                      │ UsbCameraBackend
//! ┌────────────────────┴────────────────────────┐
//! │              Backend Layer                  │
//! │  ┌──────────────┐    ┌──────────────────┐   │
//! │  │ DeviceMonitor│    │  CameraPipeline  │   │
//! │  └──────────────┘    └──────────────────┘   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`usb`]: Device monitor trait, events, filters and registry
//! - [`camera`]: Camera pipeline trait and shared types
//! - [`simulated`]: In-memory backend for tests and the CLI driver

pub mod camera;
pub mod simulated;
pub mod usb;

use camera::{CameraPipeline, PipelineConfig};
use usb::{DeviceMonitor, EventSink};

/// Factory for the collaborators of one session
///
/// The session asks for a new monitor on every initialization and for a new
/// pipeline on every (re)build; it never reuses an instance after releasing it.
pub trait UsbCameraBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Create a monitor that reports to `events`
    fn create_monitor(&self, events: EventSink) -> Box<dyn DeviceMonitor>;

    /// Create a pipeline for `config`
    fn create_pipeline(&self, config: &PipelineConfig) -> Box<dyn CameraPipeline>;
}

// SPDX-License-Identifier: MPL-2.0

//! USB Camera - session management for hot-pluggable USB cameras
//!
//! This library coordinates one USB video-capture device across hot-plug
//! events, permission prompts, the camera open/preview/record cycle and
//! resolution changes, while keeping at most one camera pipeline open and
//! releasing every acquired resource exactly once.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`session`]: The session manager state machine and listener traits
//! - [`backends`]: Device monitor and camera pipeline abstractions, plus a
//!   simulated implementation
//! - [`config`]: Session configuration
//! - [`storage`]: Naming of captured stills and recordings
//!
//! # Example
//!
//! ```ignore
//! let backend = Arc::new(SimulatedBackend::new());
//! let session = SessionManager::new(backend, SessionConfig::default());
//! session.initialize(Some(render_target), listener)?;
//! session.register_monitoring()?;
//! session.request_permission(0)?;
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use backends::UsbCameraBackend;
pub use backends::camera::{RecordParams, RecordingListener, RenderTarget, Resolution};
pub use backends::usb::{ControlBlock, DeviceFilter, UsbDevice};
pub use config::SessionConfig;
pub use errors::{SessionError, SessionResult};
pub use session::{
    DeviceConnectListener, PreviewListener, ResolutionChange, SessionManager, SessionState,
};

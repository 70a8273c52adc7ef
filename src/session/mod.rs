// SPDX-License-Identifier: GPL-3.0-only

//! USB camera session manager
//!
//! The session is the single authority over one USB camera: it receives
//! hot-plug events from the device monitor, decides when a camera pipeline is
//! (re)built, and serializes open/close/resolution changes against the
//! caller's control operations.
//!
//! ```text
//!  Device monitor ──event──▶ inbox ──┐
//!  Pipeline reply ──result─▶ inbox ──┤
//!  Encoder output ──result─▶ inbox ──┤
//!                                    ▼
//!  Caller ──operation──────▶ [ session lock: SessionCore ] ──▶ CameraPipeline
//!                                    │
//!                                    ▼ outbox (after unlock)
//!                            caller listeners
//! ```
//!
//! # Locking
//!
//! All state lives in one mutex. Caller operations block on it for the length
//! of one transition. Inbound callbacks never block: they push into the inbox
//! and try the lock; if another thread holds it, that thread drains the inbox
//! before it returns. Adapters may therefore call back synchronously from
//! inside a session call.
//!
//! Listeners are always invoked after the lock is released.

mod listener;
mod state;

pub use listener::{DeviceConnectListener, PreviewListener};
pub use state::{ResolutionChange, SessionState};

use crate::backends::UsbCameraBackend;
use crate::backends::camera::{RecordParams, RecordingListener, RenderTarget, Resolution};
use crate::backends::usb::{DeviceRegistry, MonitorEvent, UsbDevice};
use crate::config::SessionConfig;
use crate::errors::SessionResult;
use listener::{Notification, RecordingEvent};
use state::SessionCore;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use tracing::debug;

/// Work delivered from outside the session lock
pub(crate) enum Inbound {
    Monitor {
        generation: u64,
        event: MonitorEvent,
    },
    Preview {
        pipeline_id: u64,
        serial: u64,
        success: bool,
    },
    PermissionExpired {
        request: u64,
    },
    Recording {
        pipeline_id: u64,
        listener: Arc<dyn RecordingListener>,
        event: RecordingEvent,
    },
}

/// State shared between session handles and in-flight callbacks
pub(crate) struct Shared {
    backend: Arc<dyn UsbCameraBackend>,
    config: SessionConfig,
    registry: DeviceRegistry,
    core: Mutex<SessionCore>,
    inbox: Mutex<VecDeque<Inbound>>,
}

impl Shared {
    fn lock_core(&self) -> MutexGuard<'_, SessionCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_inbox(&self) -> MutexGuard<'_, VecDeque<Inbound>> {
        self.inbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue inbound work and process it if the lock is free
    pub(crate) fn enqueue(self: &Arc<Self>, item: Inbound) {
        self.lock_inbox().push_back(item);
        self.pump();
    }

    /// Drain the inbox until it stays empty or another thread owns the lock
    fn pump(self: &Arc<Self>) {
        loop {
            if self.lock_inbox().is_empty() {
                return;
            }

            let mut core = match self.core.try_lock() {
                Ok(core) => core,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                // The holder pumps again after unlocking
                Err(TryLockError::WouldBlock) => return,
            };

            let mut out = Vec::new();
            loop {
                let next = self.lock_inbox().pop_front();
                match next {
                    Some(item) => core.handle_inbound(self, item, &mut out),
                    None => break,
                }
            }
            drop(core);

            self.dispatch(out);
        }
    }

    /// Run `op` under the session lock, then deliver what it queued
    fn with_core<R>(
        self: &Arc<Self>,
        op: impl FnOnce(&mut SessionCore, &Arc<Self>, &mut Vec<Notification>) -> R,
    ) -> R {
        let mut out = Vec::new();
        let result = {
            let mut core = self.lock_core();
            op(&mut *core, self, &mut out)
        };
        self.dispatch(out);
        self.pump();
        result
    }

    fn dispatch(self: &Arc<Self>, notifications: Vec<Notification>) {
        for notification in notifications {
            match notification {
                Notification::Attach(listener, device) => listener.on_attach_dev(&device),
                Notification::Detach(listener, device) => listener.on_detach_dev(&device),
                Notification::Connect(listener, device, connected) => {
                    listener.on_connect_dev(&device, connected)
                }
                Notification::Disconnect(listener, device) => listener.on_disconnect_dev(&device),
                Notification::PermissionTimeout(listener, device) => {
                    listener.on_permission_timeout(&device)
                }
                Notification::Preview(listener, success) => listener.on_preview_result(success),
                Notification::Recording(listener, RecordingEvent::Encoded(chunk)) => {
                    listener.on_encode_result(&chunk)
                }
                Notification::Recording(listener, RecordingEvent::Finished(path)) => {
                    listener.on_record_result(&path)
                }
                Notification::Release(generation) => {
                    self.with_core(|core, _, _| {
                        if core.monitor_generation() == generation {
                            core.release();
                        } else {
                            debug!(generation, "Session already replaced, skipping teardown");
                        }
                    });
                }
            }
        }
    }
}

/// Handle to one USB camera session
///
/// Cheap to clone; all clones drive the same session. Dropping the last
/// handle releases everything the session still holds.
#[derive(Clone)]
pub struct SessionManager {
    shared: Arc<Shared>,
}

impl SessionManager {
    /// Create an idle session on top of `backend`
    pub fn new(backend: Arc<dyn UsbCameraBackend>, config: SessionConfig) -> Self {
        let registry = DeviceRegistry::new(config.device_filters.clone());
        let core = SessionCore::new(config.resolution);

        Self {
            shared: Arc::new(Shared {
                backend,
                config,
                registry,
                core: Mutex::new(core),
                inbox: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Create the device monitor and an idle pipeline bound to `render_target`
    ///
    /// Fails with `InvalidArgument` if no render target is given. Calling it on
    /// a live session releases the previous resources first.
    pub fn initialize(
        &self,
        render_target: Option<Arc<dyn RenderTarget>>,
        listener: Arc<dyn DeviceConnectListener>,
    ) -> SessionResult<()> {
        self.shared.with_core(|core, shared, _| core.initialize(shared, render_target, listener))
    }

    /// Start receiving hot-plug and permission events
    pub fn register_monitoring(&self) -> SessionResult<()> {
        self.shared.with_core(|core, _, _| core.register_monitoring())
    }

    /// Stop receiving hot-plug and permission events
    pub fn unregister_monitoring(&self) -> SessionResult<()> {
        self.shared.with_core(|core, _, _| core.unregister_monitoring())
    }

    /// Ask the user for access to the `index`-th visible device
    ///
    /// A grant arrives later as a connect. A denial may never be reported;
    /// see `SessionConfig::permission_timeout_ms`.
    pub fn request_permission(&self, index: usize) -> SessionResult<()> {
        self.shared.with_core(|core, shared, _| core.request_permission(shared, index))
    }

    /// Rebuild the pipeline at `width`x`height` and restart preview
    ///
    /// An active recording is dropped. `listener` hears about the restarted
    /// preview.
    pub fn change_resolution(
        &self,
        width: u32,
        height: u32,
        listener: Option<Arc<dyn PreviewListener>>,
    ) -> SessionResult<ResolutionChange> {
        let resolution = Resolution::new(width, height);
        self.shared.with_core(|core, shared, out| {
            core.change_resolution(shared, resolution, listener, out)
        })
    }

    pub fn capture_picture(&self, path: &Path) -> SessionResult<()> {
        self.shared.with_core(|core, _, _| core.capture_picture(path))
    }

    pub fn start_recording(
        &self,
        params: RecordParams,
        listener: Arc<dyn RecordingListener>,
    ) -> SessionResult<()> {
        self.shared.with_core(|core, shared, _| core.start_recording(shared, params, listener))
    }

    pub fn stop_recording(&self) -> SessionResult<()> {
        self.shared.with_core(|core, _, _| core.stop_recording())
    }

    /// Close the camera but keep the connection and the pipeline
    pub fn close_camera(&self) -> SessionResult<()> {
        self.shared.with_core(|core, _, out| core.close_camera(out))
    }

    /// Tear everything down and return to `Idle`
    ///
    /// Safe to call repeatedly and from inside listener callbacks.
    pub fn release_all(&self) {
        let released = self.shared.with_core(|core, _, _| core.release());
        if !released {
            debug!("Nothing to release");
        }
    }

    // ===== Queries =====

    pub fn state(&self) -> SessionState {
        self.shared.with_core(|core, _, _| core.state())
    }

    pub fn resolution(&self) -> Resolution {
        self.shared.with_core(|core, _, _| core.resolution())
    }

    /// Devices currently visible through the configured filter
    pub fn devices(&self) -> Vec<UsbDevice> {
        self.shared.with_core(|core, shared, _| core.devices(shared))
    }

    pub fn device_count(&self) -> usize {
        self.devices().len()
    }

    pub fn is_camera_opened(&self) -> bool {
        self.shared.with_core(|core, _, _| core.is_camera_opened())
    }

    pub fn is_recording(&self) -> bool {
        self.shared.with_core(|core, _, _| core.is_recording())
    }

    /// Device whose control block the session currently holds
    pub fn connected_device(&self) -> Option<UsbDevice> {
        self.shared.with_core(|core, _, _| core.connected_device())
    }

    /// Device with an unanswered permission request
    pub fn pending_permission(&self) -> Option<UsbDevice> {
        self.shared.with_core(|core, _, _| core.pending_permission())
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let core = self.core.get_mut().unwrap_or_else(PoisonError::into_inner);
        core.release();
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("backend", &self.shared.backend.name())
            .finish_non_exhaustive()
    }
}

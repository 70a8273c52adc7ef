// SPDX-License-Identifier: GPL-3.0-only

//! Shared fixtures for the session integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use usb_camera::backends::camera::{EncodedChunk, EncodedKind};
use usb_camera::backends::simulated::SimulatedBackend;
use usb_camera::{
    DeviceConnectListener, PreviewListener, RecordingListener, RenderTarget, SessionConfig,
    SessionManager, UsbDevice,
};

/// One observed callback, by device id where there is a device
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Attach(u32),
    Detach(u32),
    Connect(u32, bool),
    Disconnect(u32),
    PermissionTimeout(u32),
    Preview(bool),
    Encoded(EncodedKind),
    Recorded(PathBuf),
}

/// Listener that records every callback in order
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn count(&self, wanted: &Event) -> usize {
        self.events().iter().filter(|e| *e == wanted).count()
    }

    /// Poll until `wanted` shows up or `timeout` passes
    pub fn wait_for(&self, wanted: &Event, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.count(wanted) > 0 {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        self.count(wanted) > 0
    }
}

impl DeviceConnectListener for Recorder {
    fn on_attach_dev(&self, device: &UsbDevice) {
        self.push(Event::Attach(device.id));
    }

    fn on_detach_dev(&self, device: &UsbDevice) {
        self.push(Event::Detach(device.id));
    }

    fn on_connect_dev(&self, device: &UsbDevice, connected: bool) {
        self.push(Event::Connect(device.id, connected));
    }

    fn on_disconnect_dev(&self, device: &UsbDevice) {
        self.push(Event::Disconnect(device.id));
    }

    fn on_permission_timeout(&self, device: &UsbDevice) {
        self.push(Event::PermissionTimeout(device.id));
    }
}

impl PreviewListener for Recorder {
    fn on_preview_result(&self, success: bool) {
        self.push(Event::Preview(success));
    }
}

impl RecordingListener for Recorder {
    fn on_encode_result(&self, chunk: &EncodedChunk) {
        self.push(Event::Encoded(chunk.kind));
    }

    fn on_record_result(&self, path: &Path) {
        self.push(Event::Recorded(path.to_path_buf()));
    }
}

/// Render target remembering the aspect ratios it was given
#[derive(Default)]
pub struct Surface {
    ratios: Mutex<Vec<f64>>,
}

impl Surface {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn last_ratio(&self) -> Option<f64> {
        self.ratios.lock().unwrap().last().copied()
    }
}

impl RenderTarget for Surface {
    fn surface_id(&self) -> u64 {
        7
    }

    fn set_aspect_ratio(&self, ratio: f64) {
        self.ratios.lock().unwrap().push(ratio);
    }
}

/// A session initialized and registered against a fresh simulated backend
pub struct Fixture {
    pub sim: SimulatedBackend,
    pub session: SessionManager,
    pub recorder: Arc<Recorder>,
    pub surface: Arc<Surface>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let sim = SimulatedBackend::new();
        let session = SessionManager::new(Arc::new(sim.clone()), config);
        let recorder = Recorder::new();
        let surface = Surface::new();

        session
            .initialize(Some(surface.clone()), recorder.clone())
            .unwrap();
        session.register_monitoring().unwrap();

        Self {
            sim,
            session,
            recorder,
            surface,
        }
    }

    /// Plug device `id` and connect to it with the default grant policy
    pub fn connect(&self, id: u32) {
        self.sim.plug(SimulatedBackend::uvc_device(id));
        let index = self
            .session
            .devices()
            .iter()
            .position(|d| d.id == id)
            .unwrap();
        self.session.request_permission(index).unwrap();
    }

    pub fn preview_listener(&self) -> Arc<dyn PreviewListener> {
        self.recorder.clone()
    }
}

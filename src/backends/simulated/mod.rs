// SPDX-License-Identifier: MPL-2.0

//! Simulated USB camera backend
//!
//! Implements the monitor and pipeline traits entirely in memory. A shared
//! "world" plays the part of the OS: tests and the CLI plug and unplug
//! devices, answer permission prompts and complete previews, and read back
//! counters describing what the session did.
//!
//! # Example
//!
//! ```ignore
//! let sim = SimulatedBackend::new();
//! let session = SessionManager::new(Arc::new(sim.clone()), SessionConfig::default());
//! session.initialize(Some(target), listener)?;
//! session.register_monitoring()?;
//! sim.plug(SimulatedBackend::uvc_device(1));
//! session.request_permission(0)?;   // granted immediately by default
//! assert!(session.is_camera_opened());
//! ```

mod monitor;
mod pipeline;

pub use monitor::SimulatedMonitor;
pub use pipeline::SimulatedPipeline;

use super::UsbCameraBackend;
use super::camera::{CameraPipeline, PipelineConfig, PreviewReply, Resolution};
use super::usb::{ControlBlock, DeviceMonitor, EventSink, MonitorEvent, UsbDevice};
use crate::constants::USB_CLASS_MISC;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// How the simulated OS answers permission requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionPolicy {
    /// Connect immediately, from inside `request_permission`
    #[default]
    Grant,
    /// Say nothing, like a denied prompt
    Deny,
    /// Report a dismissed prompt
    Cancel,
    /// Hold the request until [`SimulatedBackend::grant_pending`] or
    /// [`SimulatedBackend::cancel_pending`]
    Manual,
}

/// How simulated pipelines answer preview requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreviewPolicy {
    /// Report success from inside `start_preview`
    #[default]
    Succeed,
    /// Report failure from inside `start_preview`
    Fail,
    /// Hold the reply until [`SimulatedBackend::complete_previews`]
    Manual,
}

/// Counters describing what the session asked of the backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimStats {
    pub monitors_created: usize,
    pub monitors_destroyed: usize,
    pub register_calls: usize,
    pub unregister_calls: usize,
    pub permission_requests: usize,
    pub pipelines_created: usize,
    pub pipelines_released: usize,
    pub open_calls: usize,
    pub close_calls: usize,
    /// Pipelines open right now
    pub open_now: usize,
    /// Highest value `open_now` ever reached
    pub max_open: usize,
    pub preview_starts: usize,
    pub recordings_started: usize,
    pub recordings_stopped: usize,
    pub stills: Vec<PathBuf>,
}

/// What happened to one pipeline instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRecord {
    pub id: u64,
    pub resolution: Resolution,
    /// Connection serials of the control blocks it was opened with
    pub opened_with: Vec<u64>,
    pub preview_starts: usize,
    pub released: bool,
}

struct MonitorEntry {
    id: u64,
    sink: EventSink,
    registered: bool,
    alive: bool,
}

/// The simulated OS
#[derive(Default)]
pub(crate) struct World {
    devices: Vec<UsbDevice>,
    monitors: Vec<MonitorEntry>,
    /// Device id → serial of its open connection
    connections: HashMap<u32, u64>,
    pending_permissions: Vec<(u64, UsbDevice)>,
    pending_previews: Vec<PreviewReply>,
    pipelines: Vec<PipelineRecord>,
    stats: SimStats,
    next_monitor_id: u64,
    next_connection: u64,
    permission_policy: PermissionPolicy,
    preview_policy: PreviewPolicy,
    open_fails: bool,
}

impl World {
    /// Sinks of live, registered monitors
    fn registered_sinks(&self) -> Vec<EventSink> {
        self.monitors
            .iter()
            .filter(|m| m.alive && m.registered)
            .map(|m| Arc::clone(&m.sink))
            .collect()
    }

    fn sink_of(&self, monitor_id: u64) -> Option<EventSink> {
        self.monitors
            .iter()
            .find(|m| m.id == monitor_id && m.alive && m.registered)
            .map(|m| Arc::clone(&m.sink))
    }

    fn monitor_mut(&mut self, monitor_id: u64) -> Option<&mut MonitorEntry> {
        self.monitors.iter_mut().find(|m| m.id == monitor_id)
    }

    /// Open a connection to `device` and build the event announcing it
    fn connect(&mut self, device: &UsbDevice) -> MonitorEvent {
        let create_new = !self.connections.contains_key(&device.id);
        let connection = match self.connections.get(&device.id) {
            Some(&existing) => existing,
            None => {
                self.next_connection += 1;
                self.connections.insert(device.id, self.next_connection);
                self.next_connection
            }
        };

        MonitorEvent::Connect {
            device: device.clone(),
            control_block: ControlBlock::new(device.clone(), connection)
                .with_file_descriptor(100 + connection as i32),
            create_new,
        }
    }

    fn pipeline_mut(&mut self, id: u64) -> Option<&mut PipelineRecord> {
        self.pipelines.iter_mut().find(|p| p.id == id)
    }
}

pub(crate) type SharedWorld = Arc<Mutex<World>>;

pub(crate) fn lock_world(world: &SharedWorld) -> MutexGuard<'_, World> {
    world.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Deliver `event` to each sink, outside the world lock
fn deliver(sinks: Vec<EventSink>, event: impl Fn() -> MonitorEvent) {
    for sink in sinks {
        sink(event());
    }
}

/// In-memory backend; clones share one simulated world
#[derive(Clone, Default)]
pub struct SimulatedBackend {
    world: SharedWorld,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A UVC camera that matches the default device filter
    pub fn uvc_device(id: u32) -> UsbDevice {
        UsbDevice {
            id,
            name: format!("/dev/bus/usb/001/{:03}", id),
            vendor_id: 0x1d6b,
            product_id: 0x0100 + id as u16,
            class: USB_CLASS_MISC,
            subclass: 2,
            protocol: 1,
            product_name: Some(format!("Simulated UVC Camera {}", id)),
        }
    }

    pub fn set_permission_policy(&self, policy: PermissionPolicy) {
        lock_world(&self.world).permission_policy = policy;
    }

    pub fn set_preview_policy(&self, policy: PreviewPolicy) {
        lock_world(&self.world).preview_policy = policy;
    }

    /// Make subsequent `open` calls fail
    pub fn set_open_fails(&self, fails: bool) {
        lock_world(&self.world).open_fails = fails;
    }

    // ===== Bus =====

    /// Put a device on the bus and announce it to registered monitors
    pub fn plug(&self, device: UsbDevice) {
        let sinks = {
            let mut world = lock_world(&self.world);
            world.devices.retain(|d| d.id != device.id);
            world.devices.push(device.clone());
            world.registered_sinks()
        };
        debug!(device = %device, "Simulated plug");
        deliver(sinks, || MonitorEvent::Attach(device.clone()));
    }

    /// Pull a device: its connection closes, then it detaches
    pub fn unplug(&self, device_id: u32) -> Option<UsbDevice> {
        let (device, connection, sinks) = {
            let mut world = lock_world(&self.world);
            let index = world.devices.iter().position(|d| d.id == device_id)?;
            let device = world.devices.remove(index);
            let connection = world.connections.remove(&device_id);
            world.pending_permissions.retain(|(_, d)| d.id != device_id);
            (device, connection, world.registered_sinks())
        };
        debug!(device = %device, "Simulated unplug");

        if let Some(connection) = connection {
            deliver(sinks.clone(), || MonitorEvent::Disconnect {
                device: device.clone(),
                control_block: ControlBlock::new(device.clone(), connection),
            });
        }
        deliver(sinks, || MonitorEvent::Detach(device.clone()));
        Some(device)
    }

    pub fn devices(&self) -> Vec<UsbDevice> {
        lock_world(&self.world).devices.clone()
    }

    // ===== Permission prompts =====

    /// Grant every held permission request; returns how many were granted
    pub fn grant_pending(&self) -> usize {
        let deliveries: Vec<(EventSink, MonitorEvent)> = {
            let mut world = lock_world(&self.world);
            let pending = std::mem::take(&mut world.pending_permissions);
            pending
                .into_iter()
                .filter_map(|(monitor_id, device)| {
                    let sink = world.sink_of(monitor_id)?;
                    Some((sink, world.connect(&device)))
                })
                .collect()
        };

        let count = deliveries.len();
        for (sink, event) in deliveries {
            sink(event);
        }
        count
    }

    /// Dismiss every held permission request; returns how many were dismissed
    pub fn cancel_pending(&self) -> usize {
        let deliveries: Vec<(EventSink, UsbDevice)> = {
            let mut world = lock_world(&self.world);
            let pending = std::mem::take(&mut world.pending_permissions);
            pending
                .into_iter()
                .filter_map(|(monitor_id, device)| Some((world.sink_of(monitor_id)?, device)))
                .collect()
        };

        let count = deliveries.len();
        for (sink, device) in deliveries {
            sink(MonitorEvent::Cancel(device));
        }
        count
    }

    /// Sink of the `index`-th monitor ever created, even if it was destroyed
    pub fn monitor_sink(&self, index: usize) -> Option<EventSink> {
        lock_world(&self.world)
            .monitors
            .get(index)
            .map(|m| Arc::clone(&m.sink))
    }

    // ===== Previews =====

    /// Answer every held preview request; returns how many were answered
    pub fn complete_previews(&self, success: bool) -> usize {
        let replies = std::mem::take(&mut lock_world(&self.world).pending_previews);
        let count = replies.len();
        for reply in replies {
            reply.send(success);
        }
        count
    }

    // ===== Inspection =====

    pub fn stats(&self) -> SimStats {
        lock_world(&self.world).stats.clone()
    }

    pub fn pipelines(&self) -> Vec<PipelineRecord> {
        lock_world(&self.world).pipelines.clone()
    }
}

impl UsbCameraBackend for SimulatedBackend {
    fn name(&self) -> &str {
        "simulated"
    }

    fn create_monitor(&self, events: EventSink) -> Box<dyn DeviceMonitor> {
        let id = {
            let mut world = lock_world(&self.world);
            world.next_monitor_id += 1;
            let id = world.next_monitor_id;
            world.monitors.push(MonitorEntry {
                id,
                sink: Arc::clone(&events),
                registered: false,
                alive: true,
            });
            world.stats.monitors_created += 1;
            id
        };
        Box::new(SimulatedMonitor::new(id, Arc::clone(&self.world)))
    }

    fn create_pipeline(&self, config: &PipelineConfig) -> Box<dyn CameraPipeline> {
        let id = {
            let mut world = lock_world(&self.world);
            let id = world.pipelines.len() as u64 + 1;
            world.pipelines.push(PipelineRecord {
                id,
                resolution: config.resolution,
                opened_with: Vec::new(),
                preview_starts: 0,
                released: false,
            });
            world.stats.pipelines_created += 1;
            id
        };
        Box::new(SimulatedPipeline::new(id, *config, Arc::clone(&self.world)))
    }
}

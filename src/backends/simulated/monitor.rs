// SPDX-License-Identifier: MPL-2.0

//! Simulated device monitor

use super::{PermissionPolicy, SharedWorld, lock_world};
use crate::backends::camera::{BackendError, BackendResult};
use crate::backends::usb::{DeviceFilter, DeviceMonitor, MonitorEvent, UsbDevice};
use tracing::debug;

/// Device monitor backed by the simulated world
pub struct SimulatedMonitor {
    id: u64,
    world: SharedWorld,
    registered: bool,
    destroyed: bool,
}

impl SimulatedMonitor {
    pub(crate) fn new(id: u64, world: SharedWorld) -> Self {
        Self {
            id,
            world,
            registered: false,
            destroyed: false,
        }
    }

    fn set_registered(&mut self, registered: bool) {
        self.registered = registered;
        let mut world = lock_world(&self.world);
        if let Some(entry) = world.monitor_mut(self.id) {
            entry.registered = registered;
        }
    }
}

impl DeviceMonitor for SimulatedMonitor {
    fn register(&mut self) -> BackendResult<()> {
        if self.destroyed {
            return Err(BackendError::NotAvailable("monitor destroyed".to_string()));
        }
        if !self.registered {
            self.set_registered(true);
            lock_world(&self.world).stats.register_calls += 1;
            debug!(monitor = self.id, "Simulated monitor registered");
        }
        Ok(())
    }

    fn unregister(&mut self) {
        if self.registered {
            self.set_registered(false);
            lock_world(&self.world).stats.unregister_calls += 1;
            debug!(monitor = self.id, "Simulated monitor unregistered");
        }
    }

    fn is_registered(&self) -> bool {
        self.registered
    }

    fn device_list(&self, filter: &DeviceFilter) -> Vec<UsbDevice> {
        lock_world(&self.world)
            .devices
            .iter()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect()
    }

    fn request_permission(&mut self, device: &UsbDevice) -> BackendResult<()> {
        if self.destroyed {
            return Err(BackendError::NotAvailable("monitor destroyed".to_string()));
        }

        let delivery = {
            let mut world = lock_world(&self.world);
            if !world.devices.iter().any(|d| d.id == device.id) {
                return Err(BackendError::DeviceNotFound(device.name.clone()));
            }
            world.stats.permission_requests += 1;

            match world.permission_policy {
                PermissionPolicy::Grant => {
                    let event = world.connect(device);
                    world.sink_of(self.id).map(|sink| (sink, event))
                }
                PermissionPolicy::Cancel => world
                    .sink_of(self.id)
                    .map(|sink| (sink, MonitorEvent::Cancel(device.clone()))),
                PermissionPolicy::Deny => None,
                PermissionPolicy::Manual => {
                    world.pending_permissions.push((self.id, device.clone()));
                    None
                }
            }
        };

        if let Some((sink, event)) = delivery {
            sink(event);
        }
        Ok(())
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.unregister();
        self.destroyed = true;

        let mut world = lock_world(&self.world);
        let id = self.id;
        if let Some(entry) = world.monitor_mut(id) {
            entry.alive = false;
        }
        world.pending_permissions.retain(|(monitor_id, _)| *monitor_id != id);
        world.stats.monitors_destroyed += 1;
        debug!(monitor = id, "Simulated monitor destroyed");
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! USB hot-plug monitoring
//!
//! The monitor owns the OS subscription for attach/detach notifications and
//! the permission flow that eventually yields a [`ControlBlock`].

pub mod registry;
pub mod types;

pub use registry::{DeviceFilter, DeviceRegistry};
pub use types::{ControlBlock, UsbDevice};

use crate::backends::camera::BackendResult;
use std::sync::Arc;

/// Notification raised by a device monitor
///
/// `Disconnect` and `Detach` are distinct: a disconnect only
/// reports that the connection closed, a detach means the device is gone.
#[derive(Debug)]
pub enum MonitorEvent {
    /// A matching device appeared on the bus
    Attach(UsbDevice),
    /// A device was physically removed
    Detach(UsbDevice),
    /// Permission granted and device connected
    Connect {
        device: UsbDevice,
        control_block: ControlBlock,
        /// False when the OS reused an already open connection
        create_new: bool,
    },
    /// Connection to the device closed
    Disconnect {
        device: UsbDevice,
        control_block: ControlBlock,
    },
    /// The user dismissed the permission prompt
    Cancel(UsbDevice),
}

impl MonitorEvent {
    pub fn device(&self) -> &UsbDevice {
        match self {
            MonitorEvent::Attach(device)
            | MonitorEvent::Detach(device)
            | MonitorEvent::Cancel(device) => device,
            MonitorEvent::Connect { device, .. } | MonitorEvent::Disconnect { device, .. } => {
                device
            }
        }
    }

    /// Short event name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorEvent::Attach(_) => "attach",
            MonitorEvent::Detach(_) => "detach",
            MonitorEvent::Connect { .. } => "connect",
            MonitorEvent::Disconnect { .. } => "disconnect",
            MonitorEvent::Cancel(_) => "cancel",
        }
    }
}

/// Callback a monitor delivers its events to
///
/// May be invoked from any thread, including synchronously from inside a
/// monitor method.
pub type EventSink = Arc<dyn Fn(MonitorEvent) + Send + Sync>;

/// OS-level USB hot-plug subscription
pub trait DeviceMonitor: Send {
    /// Start delivering events; registering twice is a no-op
    fn register(&mut self) -> BackendResult<()>;

    /// Stop delivering events; unregistering twice is a no-op
    fn unregister(&mut self);

    fn is_registered(&self) -> bool;

    /// Devices currently on the bus that match `filter`
    fn device_list(&self, filter: &DeviceFilter) -> Vec<UsbDevice>;

    /// Ask the user for access to `device`
    ///
    /// A grant is delivered later as [`MonitorEvent::Connect`], a dismissed
    /// prompt as [`MonitorEvent::Cancel`]. A denial may produce nothing.
    fn request_permission(&mut self, device: &UsbDevice) -> BackendResult<()>;

    /// Unregister and free the subscription. The instance is not used afterwards.
    fn destroy(&mut self);
}

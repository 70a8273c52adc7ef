// SPDX-License-Identifier: GPL-3.0-only

//! USB device handles and connection capabilities

/// A physical USB device as reported by the monitor
///
/// Only meaningful between the attach that announced it and the matching
/// detach.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsbDevice {
    /// Kernel device id (unique while attached)
    pub id: u32,
    /// Bus path, e.g. "/dev/bus/usb/001/004"
    pub name: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    /// Product string descriptor, if the device reports one
    pub product_name: Option<String>,
}

impl std::fmt::Display for UsbDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{:04x}:{:04x}]",
            self.product_name.as_deref().unwrap_or(&self.name),
            self.vendor_id,
            self.product_id
        )
    }
}

/// Exclusive capability to talk to one connected device
///
/// Handed out by the monitor once the device is connected and the user
/// granted permission. Not `Clone`: the session holds the only instance
/// until the device goes away. Every new connection produces a new block with
/// a new `connection` serial.
#[derive(Debug, PartialEq, Eq)]
pub struct ControlBlock {
    device: UsbDevice,
    connection: u64,
    file_descriptor: Option<i32>,
}

impl ControlBlock {
    pub fn new(device: UsbDevice, connection: u64) -> Self {
        Self {
            device,
            connection,
            file_descriptor: None,
        }
    }

    /// Attach the OS file descriptor backing this connection
    pub fn with_file_descriptor(mut self, fd: i32) -> Self {
        self.file_descriptor = Some(fd);
        self
    }

    pub fn device(&self) -> &UsbDevice {
        &self.device
    }

    /// Serial of the connection that produced this block
    pub fn connection(&self) -> u64 {
        self.connection
    }

    pub fn file_descriptor(&self) -> Option<i32> {
        self.file_descriptor
    }
}

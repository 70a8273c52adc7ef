// SPDX-License-Identifier: GPL-3.0-only

//! Device filters and the device registry query

use super::DeviceMonitor;
use super::types::UsbDevice;
use serde::{Deserialize, Serialize};

/// Match rule for USB devices; `None` fields match anything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceFilter {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub class: Option<u8>,
    pub subclass: Option<u8>,
    pub protocol: Option<u8>,
}

impl DeviceFilter {
    /// Filter that accepts every device
    pub fn any() -> Self {
        Self::default()
    }

    /// Filter on a vendor/product pair
    pub fn with_ids(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id: Some(vendor_id),
            product_id: Some(product_id),
            ..Self::default()
        }
    }

    /// Filter on an interface class triple
    pub fn with_class(class: u8, subclass: Option<u8>, protocol: Option<u8>) -> Self {
        Self {
            class: Some(class),
            subclass,
            protocol,
            ..Self::default()
        }
    }

    pub fn matches(&self, device: &UsbDevice) -> bool {
        fn field<T: PartialEq>(want: Option<T>, have: T) -> bool {
            want.is_none_or(|w| w == have)
        }

        field(self.vendor_id, device.vendor_id)
            && field(self.product_id, device.product_id)
            && field(self.class, device.class)
            && field(self.subclass, device.subclass)
            && field(self.protocol, device.protocol)
    }
}

/// Stateless view of the devices a monitor currently sees
///
/// Only the first configured filter is used for lookups, so index `n` in
/// [`DeviceRegistry::list`] always refers to the same ordering the caller
/// sees in [`DeviceRegistry::count`].
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    filters: Vec<DeviceFilter>,
}

impl DeviceRegistry {
    pub fn new(filters: Vec<DeviceFilter>) -> Self {
        Self { filters }
    }

    /// The filter used for lookups
    pub fn primary_filter(&self) -> DeviceFilter {
        self.filters.first().cloned().unwrap_or_default()
    }

    /// Currently visible devices matching the primary filter
    pub fn list(&self, monitor: &dyn DeviceMonitor) -> Vec<UsbDevice> {
        monitor.device_list(&self.primary_filter())
    }

    pub fn count(&self, monitor: &dyn DeviceMonitor) -> usize {
        self.list(monitor).len()
    }

    /// The `index`-th visible device, if there is one
    pub fn get(&self, monitor: &dyn DeviceMonitor, index: usize) -> Option<UsbDevice> {
        self.list(monitor).into_iter().nth(index)
    }
}

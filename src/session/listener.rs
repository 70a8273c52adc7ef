// SPDX-License-Identifier: GPL-3.0-only

//! Caller-facing listener interfaces

use super::{Inbound, Shared};
use crate::backends::camera::{EncodedChunk, RecordingListener};
use crate::backends::usb::UsbDevice;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Device lifecycle notifications
///
/// Called without the session lock held, so implementations may call back
/// into the session (for example `release_all` from `on_detach_dev`).
pub trait DeviceConnectListener: Send + Sync {
    /// A matching device was plugged in
    fn on_attach_dev(&self, device: &UsbDevice);

    /// A device was unplugged; the session is torn down right after this returns
    fn on_detach_dev(&self, device: &UsbDevice);

    /// Outcome of a connection attempt (camera opened and preview started)
    fn on_connect_dev(&self, device: &UsbDevice, connected: bool);

    /// The connection to a device closed
    fn on_disconnect_dev(&self, device: &UsbDevice);

    /// A permission request got no answer within the configured timeout
    fn on_permission_timeout(&self, _device: &UsbDevice) {}
}

/// Outcome of a preview restart after a resolution change
pub trait PreviewListener: Send + Sync {
    fn on_preview_result(&self, success: bool);
}

/// Notification queued while the session lock is held
pub(crate) enum Notification {
    Attach(Arc<dyn DeviceConnectListener>, UsbDevice),
    Detach(Arc<dyn DeviceConnectListener>, UsbDevice),
    Connect(Arc<dyn DeviceConnectListener>, UsbDevice, bool),
    Disconnect(Arc<dyn DeviceConnectListener>, UsbDevice),
    PermissionTimeout(Arc<dyn DeviceConnectListener>, UsbDevice),
    Preview(Arc<dyn PreviewListener>, bool),
    Recording(Arc<dyn RecordingListener>, RecordingEvent),
    /// Full teardown of the given monitor generation, queued behind the
    /// detach notification
    Release(u64),
}

/// Recording output on its way to the caller's listener
pub(crate) enum RecordingEvent {
    Encoded(EncodedChunk),
    Finished(PathBuf),
}

/// Handed to the pipeline in place of the caller's recording listener
///
/// Routes encoder output through the session inbox, so the caller hears about
/// it outside the session lock and only while its pipeline is still current.
pub(crate) struct RecordingRelay {
    shared: Weak<Shared>,
    pipeline_id: u64,
    listener: Arc<dyn RecordingListener>,
}

impl RecordingRelay {
    pub(crate) fn new(
        shared: Weak<Shared>,
        pipeline_id: u64,
        listener: Arc<dyn RecordingListener>,
    ) -> Self {
        Self {
            shared,
            pipeline_id,
            listener,
        }
    }

    fn forward(&self, event: RecordingEvent) {
        match self.shared.upgrade() {
            Some(shared) => shared.enqueue(Inbound::Recording {
                pipeline_id: self.pipeline_id,
                listener: Arc::clone(&self.listener),
                event,
            }),
            None => {
                debug!(
                    pipeline_id = self.pipeline_id,
                    "Session gone, dropping recording output"
                );
            }
        }
    }
}

impl RecordingListener for RecordingRelay {
    fn on_encode_result(&self, chunk: &EncodedChunk) {
        self.forward(RecordingEvent::Encoded(chunk.clone()));
    }

    fn on_record_result(&self, path: &Path) {
        self.forward(RecordingEvent::Finished(path.to_path_buf()));
    }
}

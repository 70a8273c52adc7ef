// SPDX-License-Identifier: GPL-3.0-only

//! Camera pipeline abstraction
//!
//! A camera pipeline owns one opened device handle and drives preview,
//! still capture and recording for it.
//!
//! ```text
//! ┌─────────────────────┐
//! │   SessionManager    │  ← Decides when pipelines are built and torn down
//! └──────────┬──────────┘
//!            │ open / start_preview / capture / record
//!            ▼
//! ┌─────────────────────┐
//! │ CameraPipeline Trait│  ← Common interface
//! └──────────┬──────────┘
//!            │
//!            ▼
//!   ┌──────────────────┐
//!   │ UVC / simulated  │  ← Concrete implementation
//!   └──────────────────┘
//! ```

pub mod types;

pub use types::*;

use crate::backends::usb::ControlBlock;
use std::path::Path;
use tracing::debug;

/// Camera pipeline bound to one resolution and one device at a time
///
/// `open` and `close` must be idempotent. Preview start is asynchronous: the
/// pipeline answers through the [`PreviewReply`] once the first frame is
/// rendered (or the stream failed to start).
pub trait CameraPipeline: Send {
    // ===== Lifecycle =====

    /// Open the device granted by `control_block`
    ///
    /// Opening an already opened pipeline is a no-op.
    fn open(&mut self, control_block: &ControlBlock) -> BackendResult<()>;

    /// Close the device handle, stopping preview and any recording
    ///
    /// Closing a closed pipeline is a no-op.
    fn close(&mut self);

    /// Free everything the pipeline holds. The instance is not used afterwards.
    fn release(&mut self);

    // ===== Preview =====

    /// Start streaming into `target`; the outcome is reported through `reply`
    fn start_preview(&mut self, target: &dyn RenderTarget, reply: PreviewReply);

    // ===== Capture =====

    /// Save a still frame to `path`
    fn capture_still(&mut self, path: &Path) -> BackendResult<()>;

    /// Start recording; encoder output is delivered to `listener`
    fn start_recording(
        &mut self,
        params: RecordParams,
        listener: Box<dyn RecordingListener>,
    ) -> BackendResult<()>;

    /// Stop recording and finalize the output file
    fn stop_recording(&mut self) -> BackendResult<()>;

    // ===== Queries =====

    fn is_opened(&self) -> bool;

    fn is_recording(&self) -> bool;

    /// Resolution this instance was built for
    fn resolution(&self) -> Resolution;
}

type ReplyFn = Box<dyn FnOnce(bool) + Send>;

/// One-shot preview result handle
///
/// Exactly one result is delivered per handle: either the value passed to
/// [`PreviewReply::send`], or `false` if the handle is dropped unanswered.
pub struct PreviewReply {
    callback: Option<ReplyFn>,
}

impl PreviewReply {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(bool) + Send + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    /// Report whether preview started
    pub fn send(mut self, success: bool) {
        if let Some(callback) = self.callback.take() {
            callback(success);
        }
    }
}

impl Drop for PreviewReply {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            debug!("Preview reply dropped without an answer, reporting failure");
            callback(false);
        }
    }
}

impl std::fmt::Debug for PreviewReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewReply")
            .field("answered", &self.callback.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording_reply() -> (PreviewReply, Arc<Mutex<Vec<bool>>>) {
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&results);
        let reply = PreviewReply::new(move |ok| sink.lock().unwrap().push(ok));
        (reply, results)
    }

    #[test]
    fn test_reply_delivers_value_once() {
        let (reply, results) = recording_reply();
        reply.send(true);
        assert_eq!(*results.lock().unwrap(), vec![true]);
    }

    #[test]
    fn test_dropped_reply_reports_failure() {
        let (reply, results) = recording_reply();
        drop(reply);
        assert_eq!(*results.lock().unwrap(), vec![false]);
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! Session state machine
//!
//! Every method here runs with the session lock held. Listener calls are not
//! made directly; they are queued as [`Notification`]s and delivered by the
//! caller once the lock is released.

use super::listener::{
    DeviceConnectListener, Notification, PreviewListener, RecordingEvent, RecordingRelay,
};
use super::{Inbound, Shared};
use crate::backends::camera::{
    CameraPipeline, PreviewReply, RecordParams, RecordingListener, RenderTarget, Resolution,
};
use crate::backends::usb::{ControlBlock, DeviceMonitor, EventSink, MonitorEvent, UsbDevice};
use crate::errors::{SessionError, SessionResult};
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Observable session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Nothing initialized, or everything released
    Idle,
    /// Monitor and idle pipeline exist, no device connected
    Monitoring,
    /// A control block is held; the camera may or may not be open
    Connected,
    /// Preview was started on the open camera
    PreviewActive,
    /// Recording on top of an active preview
    Recording,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Monitoring => "monitoring",
            SessionState::Connected => "connected",
            SessionState::PreviewActive => "preview-active",
            SessionState::Recording => "recording",
        };
        write!(f, "{}", name)
    }
}

/// What `change_resolution` ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionChange {
    /// Same resolution as the current one; nothing touched
    Unchanged,
    /// Stored for the next initialization; no pipeline existed
    Deferred,
    /// Pipeline torn down and rebuilt at the new resolution
    Rebuilt,
}

/// Connection phase; the control block lives inside the phases that own one
#[derive(Debug)]
enum Link {
    Idle,
    Monitoring,
    Connected(ControlBlock),
    PreviewActive(ControlBlock),
    Recording(ControlBlock),
}

impl Link {
    fn state(&self) -> SessionState {
        match self {
            Link::Idle => SessionState::Idle,
            Link::Monitoring => SessionState::Monitoring,
            Link::Connected(_) => SessionState::Connected,
            Link::PreviewActive(_) => SessionState::PreviewActive,
            Link::Recording(_) => SessionState::Recording,
        }
    }

    fn control_block(&self) -> Option<&ControlBlock> {
        match self {
            Link::Connected(block) | Link::PreviewActive(block) | Link::Recording(block) => {
                Some(block)
            }
            Link::Idle | Link::Monitoring => None,
        }
    }

    /// Same control block, moved to a different phase. Phases without a block
    /// are returned unchanged.
    fn with_phase(self, phase: SessionState) -> Link {
        match self {
            Link::Connected(block) | Link::PreviewActive(block) | Link::Recording(block) => {
                match phase {
                    SessionState::PreviewActive => Link::PreviewActive(block),
                    SessionState::Recording => Link::Recording(block),
                    _ => Link::Connected(block),
                }
            }
            other => other,
        }
    }
}

/// The camera pipeline currently owned by the session
struct PipelineSlot {
    id: u64,
    pipeline: Box<dyn CameraPipeline>,
}

/// Outstanding permission request
#[derive(Debug, Clone)]
struct PendingPermission {
    request: u64,
    device: UsbDevice,
}

/// Who hears about the outcome of the preview in flight
struct PreviewRoute {
    /// Device whose connect attempt completes with this preview
    connect: Option<UsbDevice>,
    /// Caller of the resolution change that restarted preview
    listener: Option<Arc<dyn PreviewListener>>,
}

impl PreviewRoute {
    fn resolve(
        self,
        success: bool,
        connect_listener: Option<Arc<dyn DeviceConnectListener>>,
        out: &mut Vec<Notification>,
    ) {
        if let (Some(device), Some(listener)) = (self.connect, connect_listener) {
            out.push(Notification::Connect(listener, device, success));
        }
        if let Some(listener) = self.listener {
            out.push(Notification::Preview(listener, success));
        }
    }
}

/// Preview request still waiting for its reply
struct PendingPreview {
    serial: u64,
    route: PreviewRoute,
}

/// Mutable session state, guarded by the session lock
pub(crate) struct SessionCore {
    link: Link,
    monitor: Option<Box<dyn DeviceMonitor>>,
    monitor_generation: u64,
    /// Set between a detach and the teardown it triggers
    detaching: bool,
    pipeline: Option<PipelineSlot>,
    next_pipeline_id: u64,
    render_target: Option<Arc<dyn RenderTarget>>,
    listener: Option<Arc<dyn DeviceConnectListener>>,
    resolution: Resolution,
    pending_permission: Option<PendingPermission>,
    next_request: u64,
    preview: Option<PendingPreview>,
    next_preview: u64,
}

impl SessionCore {
    pub(crate) fn new(resolution: Resolution) -> Self {
        Self {
            link: Link::Idle,
            monitor: None,
            monitor_generation: 0,
            detaching: false,
            pipeline: None,
            next_pipeline_id: 1,
            render_target: None,
            listener: None,
            resolution,
            pending_permission: None,
            next_request: 1,
            preview: None,
            next_preview: 1,
        }
    }

    // ===== Queries =====

    pub(crate) fn state(&mut self) -> SessionState {
        self.sync_recording();
        self.link.state()
    }

    pub(crate) fn monitor_generation(&self) -> u64 {
        self.monitor_generation
    }

    pub(crate) fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub(crate) fn is_camera_opened(&self) -> bool {
        self.pipeline
            .as_ref()
            .is_some_and(|slot| slot.pipeline.is_opened())
    }

    pub(crate) fn is_recording(&self) -> bool {
        self.pipeline
            .as_ref()
            .is_some_and(|slot| slot.pipeline.is_recording())
    }

    pub(crate) fn connected_device(&self) -> Option<UsbDevice> {
        self.link.control_block().map(|block| block.device().clone())
    }

    pub(crate) fn pending_permission(&self) -> Option<UsbDevice> {
        self.pending_permission
            .as_ref()
            .map(|pending| pending.device.clone())
    }

    pub(crate) fn devices(&self, shared: &Shared) -> Vec<UsbDevice> {
        match self.monitor.as_deref() {
            Some(monitor) => shared.registry.list(monitor),
            None => Vec::new(),
        }
    }

    // ===== Lifecycle =====

    pub(crate) fn initialize(
        &mut self,
        shared: &Arc<Shared>,
        render_target: Option<Arc<dyn RenderTarget>>,
        listener: Arc<dyn DeviceConnectListener>,
    ) -> SessionResult<()> {
        let render_target = render_target
            .ok_or_else(|| SessionError::InvalidArgument("render target is required".into()))?;

        if self.monitor.is_some() || self.pipeline.is_some() {
            warn!("Session re-initialized while live, releasing previous resources");
            self.release();
        }

        self.monitor_generation += 1;
        let sink = event_sink(Arc::downgrade(shared), self.monitor_generation);
        self.monitor = Some(shared.backend.create_monitor(sink));
        self.listener = Some(listener);
        self.render_target = Some(render_target);

        self.rebuild_pipeline(shared);
        self.link = Link::Monitoring;

        info!(
            backend = shared.backend.name(),
            resolution = %self.resolution,
            generation = self.monitor_generation,
            "Session initialized"
        );
        Ok(())
    }

    pub(crate) fn register_monitoring(&mut self) -> SessionResult<()> {
        let monitor = self
            .monitor
            .as_mut()
            .ok_or(SessionError::NotReady("device monitor not initialized"))?;

        if !monitor.is_registered() {
            monitor.register()?;
            debug!("Device monitor registered");
        }
        Ok(())
    }

    pub(crate) fn unregister_monitoring(&mut self) -> SessionResult<()> {
        let monitor = self
            .monitor
            .as_mut()
            .ok_or(SessionError::NotReady("device monitor not initialized"))?;

        if monitor.is_registered() {
            monitor.unregister();
            debug!("Device monitor unregistered");
        }
        Ok(())
    }

    pub(crate) fn request_permission(
        &mut self,
        shared: &Arc<Shared>,
        index: usize,
    ) -> SessionResult<()> {
        let monitor = self
            .monitor
            .as_mut()
            .ok_or(SessionError::NotReady("device monitor not initialized"))?;

        let Some(device) = shared.registry.get(&**monitor, index) else {
            return Err(SessionError::InvalidArgument(format!(
                "device index {} out of range ({} devices)",
                index,
                shared.registry.count(&**monitor)
            )));
        };

        monitor.request_permission(&device)?;

        let request = self.next_request;
        self.next_request += 1;
        info!(device = %device, request, "Requested device permission");

        if let Some(timeout) = shared.config.permission_timeout() {
            arm_permission_timer(Arc::downgrade(shared), request, timeout);
        }
        self.pending_permission = Some(PendingPermission { request, device });
        Ok(())
    }

    /// Full teardown: close and release the pipeline, destroy the monitor,
    /// forget the connection. Returns false if there was nothing to release.
    ///
    /// Each handle is taken out of the state before it is called into, so a
    /// re-entrant release finds nothing left to free.
    pub(crate) fn release(&mut self) -> bool {
        let had_resources =
            self.pipeline.is_some() || self.monitor.is_some() || !matches!(self.link, Link::Idle);

        self.teardown_pipeline();

        if let Some(mut monitor) = self.monitor.take() {
            monitor.destroy();
            debug!(generation = self.monitor_generation, "Device monitor destroyed");
        }

        self.link = Link::Idle;
        self.detaching = false;
        self.pending_permission = None;
        self.preview = None;
        self.render_target = None;
        self.listener = None;

        if had_resources {
            info!("Session released");
        }
        had_resources
    }

    pub(crate) fn close_camera(&mut self, out: &mut Vec<Notification>) -> SessionResult<()> {
        let slot = self
            .pipeline
            .as_mut()
            .ok_or(SessionError::NotReady("no camera pipeline"))?;

        slot.pipeline.close();
        let pipeline_id = slot.id;
        self.abandon_preview(out);
        let link = std::mem::replace(&mut self.link, Link::Idle);
        self.link = link.with_phase(SessionState::Connected);
        debug!(pipeline_id, "Camera closed");
        Ok(())
    }

    // ===== Camera operations =====

    pub(crate) fn change_resolution(
        &mut self,
        shared: &Arc<Shared>,
        resolution: Resolution,
        listener: Option<Arc<dyn PreviewListener>>,
        out: &mut Vec<Notification>,
    ) -> SessionResult<ResolutionChange> {
        if !resolution.is_valid() {
            return Err(SessionError::InvalidArgument(format!(
                "resolution {} has a zero dimension",
                resolution
            )));
        }
        if resolution == self.resolution {
            debug!(resolution = %resolution, "Resolution unchanged");
            return Ok(ResolutionChange::Unchanged);
        }

        let previous = self.resolution;
        self.resolution = resolution;

        if self.render_target.is_none() {
            debug!(resolution = %resolution, "No pipeline yet, resolution stored for later");
            return Ok(ResolutionChange::Deferred);
        }

        info!(
            from = %previous,
            to = %resolution,
            state = %self.link.state(),
            "Changing resolution"
        );

        // Recording does not survive the rebuild
        let link = std::mem::replace(&mut self.link, Link::Idle);
        self.link = link.with_phase(SessionState::Connected);

        // A connect attempt still waiting on its preview is answered by the
        // restarted one
        let mut route = PreviewRoute {
            connect: None,
            listener,
        };
        if let Some(superseded) = self.preview.take() {
            route.connect = superseded.route.connect;
            if let Some(earlier) = superseded.route.listener {
                out.push(Notification::Preview(earlier, false));
            }
        }

        self.rebuild_pipeline(shared);

        if self.link.control_block().is_some() {
            match self.open_pipeline() {
                Ok(()) => self.start_preview(shared, route, out),
                Err(e) => {
                    warn!(error = %e, "Failed to reopen camera after resolution change");
                    route.resolve(false, self.listener.clone(), out);
                }
            }
        }

        Ok(ResolutionChange::Rebuilt)
    }

    pub(crate) fn capture_picture(&mut self, path: &Path) -> SessionResult<()> {
        let slot = self
            .pipeline
            .as_mut()
            .filter(|slot| slot.pipeline.is_opened())
            .ok_or(SessionError::NotReady("camera not opened"))?;

        slot.pipeline.capture_still(path)?;
        info!(path = %path.display(), "Captured still");
        Ok(())
    }

    pub(crate) fn start_recording(
        &mut self,
        shared: &Arc<Shared>,
        params: RecordParams,
        listener: Arc<dyn RecordingListener>,
    ) -> SessionResult<()> {
        self.sync_recording();

        let slot = self
            .pipeline
            .as_mut()
            .ok_or(SessionError::NotReady("no camera pipeline"))?;
        if slot.pipeline.is_recording() {
            return Err(SessionError::RecordingInProgress);
        }
        if !matches!(self.link, Link::PreviewActive(_)) {
            return Err(SessionError::NotReady("preview not active"));
        }

        let output = params.output_path.clone();
        let relay = RecordingRelay::new(Arc::downgrade(shared), slot.id, listener);
        slot.pipeline.start_recording(params, Box::new(relay))?;

        let link = std::mem::replace(&mut self.link, Link::Idle);
        self.link = link.with_phase(SessionState::Recording);
        info!(output = %output.display(), pipeline_id = slot.id, "Recording started");
        Ok(())
    }

    pub(crate) fn stop_recording(&mut self) -> SessionResult<()> {
        let slot = self
            .pipeline
            .as_mut()
            .ok_or(SessionError::NotReady("no camera pipeline"))?;
        if !slot.pipeline.is_recording() {
            self.sync_recording();
            return Err(SessionError::NoRecordingInProgress);
        }

        let result = slot.pipeline.stop_recording();
        let pipeline_id = slot.id;
        self.sync_recording();
        result?;

        info!(pipeline_id, "Recording stopped");
        Ok(())
    }

    // ===== Inbound events =====

    pub(crate) fn handle_inbound(
        &mut self,
        shared: &Arc<Shared>,
        item: Inbound,
        out: &mut Vec<Notification>,
    ) {
        match item {
            Inbound::Monitor { generation, event } => {
                self.handle_monitor_event(shared, generation, event, out)
            }
            Inbound::Preview {
                pipeline_id,
                serial,
                success,
            } => self.handle_preview_result(pipeline_id, serial, success, out),
            Inbound::PermissionExpired { request } => self.handle_permission_expired(request, out),
            Inbound::Recording {
                pipeline_id,
                listener,
                event,
            } => self.handle_recording_event(pipeline_id, listener, event, out),
        }
    }

    fn handle_monitor_event(
        &mut self,
        shared: &Arc<Shared>,
        generation: u64,
        event: MonitorEvent,
        out: &mut Vec<Notification>,
    ) {
        if self.monitor.is_none() || generation != self.monitor_generation || self.detaching {
            debug!(
                event = event.kind(),
                generation,
                current = self.monitor_generation,
                "Discarding event from a stale monitor"
            );
            return;
        }

        debug!(event = event.kind(), device = %event.device(), "Monitor event");

        match event {
            MonitorEvent::Attach(device) => {
                if let Some(listener) = self.listener.clone() {
                    out.push(Notification::Attach(listener, device));
                }
            }
            MonitorEvent::Detach(device) => {
                info!(device = %device, "Device detached, tearing session down");
                self.detaching = true;
                if let Some(listener) = self.listener.clone() {
                    out.push(Notification::Detach(listener, device));
                }
                out.push(Notification::Release(self.monitor_generation));
            }
            MonitorEvent::Connect {
                device,
                control_block,
                create_new,
            } => self.handle_connect(shared, device, control_block, create_new, out),
            MonitorEvent::Disconnect {
                device,
                control_block,
            } => {
                // The camera closes with its connection; teardown waits for detach
                let held = self.link.control_block().is_some_and(|block| {
                    block.connection() == control_block.connection() && block.device() == &device
                });
                if held {
                    info!(
                        device = %device,
                        connection = control_block.connection(),
                        "Connection closed, closing camera"
                    );
                    if let Some(slot) = self.pipeline.as_mut() {
                        slot.pipeline.close();
                    }
                    self.abandon_preview(out);
                    self.link = Link::Monitoring;
                }
                if let Some(listener) = self.listener.clone() {
                    out.push(Notification::Disconnect(listener, device));
                }
            }
            MonitorEvent::Cancel(device) => {
                if self
                    .pending_permission
                    .as_ref()
                    .is_some_and(|pending| pending.device == device)
                {
                    self.pending_permission = None;
                }
                debug!(device = %device, "Permission prompt dismissed");
            }
        }
    }

    fn handle_connect(
        &mut self,
        shared: &Arc<Shared>,
        device: UsbDevice,
        control_block: ControlBlock,
        create_new: bool,
        out: &mut Vec<Notification>,
    ) {
        if self
            .pending_permission
            .as_ref()
            .is_some_and(|pending| pending.device == device)
        {
            self.pending_permission = None;
        }

        if let Some(current) = self.link.control_block() {
            warn!(
                device = %device,
                current = %current.device(),
                "Already connected, rejecting second connection"
            );
            if let Some(listener) = self.listener.clone() {
                out.push(Notification::Connect(listener, device, false));
            }
            return;
        }

        info!(
            device = %device,
            connection = control_block.connection(),
            create_new,
            "Device connected"
        );
        self.link = Link::Connected(control_block);

        let resolution = self.resolution;
        if self
            .pipeline
            .as_ref()
            .is_none_or(|slot| slot.pipeline.resolution() != resolution)
        {
            self.rebuild_pipeline(shared);
        }

        match self.open_pipeline() {
            Ok(()) => {
                let route = PreviewRoute {
                    connect: Some(device),
                    listener: None,
                };
                self.start_preview(shared, route, out);
            }
            Err(e) => {
                warn!(device = %device, error = %e, "Failed to open camera");
                if let Some(listener) = self.listener.clone() {
                    out.push(Notification::Connect(listener, device, false));
                }
            }
        }
    }

    fn handle_preview_result(
        &mut self,
        pipeline_id: u64,
        serial: u64,
        success: bool,
        out: &mut Vec<Notification>,
    ) {
        let current = self.pipeline.as_ref().map(|slot| slot.id);
        let expected = self.preview.as_ref().map(|pending| pending.serial);
        if current != Some(pipeline_id) || expected != Some(serial) {
            debug!(pipeline_id, serial, ?current, success, "Discarding stale preview result");
            return;
        }
        let Some(pending) = self.preview.take() else {
            return;
        };

        if success {
            info!(pipeline_id, "Preview started");
        } else {
            warn!(pipeline_id, "Preview failed to start");
            if matches!(self.link, Link::PreviewActive(_)) {
                let link = std::mem::replace(&mut self.link, Link::Idle);
                self.link = link.with_phase(SessionState::Connected);
            }
        }

        pending.route.resolve(success, self.listener.clone(), out);
    }

    fn handle_recording_event(
        &mut self,
        pipeline_id: u64,
        listener: Arc<dyn RecordingListener>,
        event: RecordingEvent,
        out: &mut Vec<Notification>,
    ) {
        if self.pipeline.as_ref().map(|slot| slot.id) != Some(pipeline_id) {
            debug!(pipeline_id, "Discarding recording output from a torn-down pipeline");
            return;
        }
        out.push(Notification::Recording(listener, event));
    }

    fn handle_permission_expired(&mut self, request: u64, out: &mut Vec<Notification>) {
        let Some(pending) = self
            .pending_permission
            .take_if(|pending| pending.request == request)
        else {
            return;
        };

        warn!(device = %pending.device, request, "Permission request timed out");
        if let Some(listener) = self.listener.clone() {
            out.push(Notification::PermissionTimeout(listener, pending.device));
        }
    }

    // ===== Pipeline helpers =====

    /// Close then release the current pipeline, if any
    fn teardown_pipeline(&mut self) {
        if let Some(mut slot) = self.pipeline.take() {
            slot.pipeline.close();
            slot.pipeline.release();
            debug!(pipeline_id = slot.id, "Camera pipeline released");
        }
    }

    /// Replace the current pipeline with a fresh one at the current resolution
    fn rebuild_pipeline(&mut self, shared: &Shared) {
        self.teardown_pipeline();

        if let Some(target) = &self.render_target {
            target.set_aspect_ratio(self.resolution.aspect_ratio());
        }

        let id = self.next_pipeline_id;
        self.next_pipeline_id += 1;
        let pipeline = shared
            .backend
            .create_pipeline(&shared.config.pipeline_config(self.resolution));
        self.pipeline = Some(PipelineSlot { id, pipeline });

        debug!(pipeline_id = id, resolution = %self.resolution, "Camera pipeline created");
    }

    fn open_pipeline(&mut self) -> SessionResult<()> {
        let block = self
            .link
            .control_block()
            .ok_or(SessionError::NotReady("no control block"))?;
        let slot = self
            .pipeline
            .as_mut()
            .ok_or(SessionError::NotReady("no camera pipeline"))?;

        slot.pipeline.open(block)?;
        debug!(pipeline_id = slot.id, connection = block.connection(), "Camera opened");
        Ok(())
    }

    fn start_preview(
        &mut self,
        shared: &Arc<Shared>,
        route: PreviewRoute,
        out: &mut Vec<Notification>,
    ) {
        let (Some(target), Some(id)) = (
            self.render_target.clone(),
            self.pipeline.as_ref().map(|slot| slot.id),
        ) else {
            route.resolve(false, self.listener.clone(), out);
            return;
        };

        let serial = self.next_preview;
        self.next_preview += 1;
        self.preview = Some(PendingPreview { serial, route });

        let reply = preview_reply(Arc::downgrade(shared), id, serial);
        if let Some(slot) = self.pipeline.as_mut() {
            slot.pipeline.start_preview(target.as_ref(), reply);
        }

        let link = std::mem::replace(&mut self.link, Link::Idle);
        self.link = link.with_phase(SessionState::PreviewActive);
    }

    /// Answer the preview in flight with a failure; its reply becomes stale
    fn abandon_preview(&mut self, out: &mut Vec<Notification>) {
        if let Some(pending) = self.preview.take() {
            debug!(serial = pending.serial, "Abandoning preview in flight");
            pending.route.resolve(false, self.listener.clone(), out);
        }
    }

    /// Drop back to preview if the pipeline finished recording on its own
    fn sync_recording(&mut self) {
        if matches!(self.link, Link::Recording(_)) && !self.is_recording() {
            let link = std::mem::replace(&mut self.link, Link::Idle);
            self.link = link.with_phase(SessionState::PreviewActive);
        }
    }
}

// ===== Inbound callbacks =====

fn event_sink(shared: Weak<Shared>, generation: u64) -> EventSink {
    Arc::new(move |event| {
        if let Some(shared) = shared.upgrade() {
            shared.enqueue(Inbound::Monitor { generation, event });
        }
    })
}

fn preview_reply(shared: Weak<Shared>, pipeline_id: u64, serial: u64) -> PreviewReply {
    PreviewReply::new(move |success| {
        if let Some(shared) = shared.upgrade() {
            shared.enqueue(Inbound::Preview {
                pipeline_id,
                serial,
                success,
            });
        }
    })
}

fn arm_permission_timer(shared: Weak<Shared>, request: u64, timeout: Duration) {
    let spawned = std::thread::Builder::new()
        .name("permission-timeout".to_string())
        .spawn(move || {
            std::thread::sleep(timeout);
            if let Some(shared) = shared.upgrade() {
                shared.enqueue(Inbound::PermissionExpired { request });
            }
        });

    if let Err(e) = spawned {
        warn!(error = %e, "Failed to arm permission timeout");
    }
}

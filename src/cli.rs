// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands driving the session against the simulated backend
//!
//! This module provides command-line functionality for:
//! - Listing the devices the session would see
//! - Replaying a full hot-plug scenario and printing every callback

use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use usb_camera::backends::simulated::{PermissionPolicy, SimulatedBackend};
use usb_camera::constants::{
    PICTURE_PREFIX, SIMULATED_EVENT_DELAY, SUFFIX_MP4, SUFFIX_PNG, VIDEO_PREFIX,
};
use usb_camera::{
    DeviceConnectListener, PreviewListener, RecordParams, RecordingListener, RenderTarget,
    Resolution, ResolutionChange, SessionConfig, SessionError, SessionManager, UsbDevice, storage,
};

/// How long the driver waits for any single callback
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Permission timeout used by `--deny` when the configuration sets none
const DENY_TIMEOUT_MS: u64 = 300;

/// Options for the `simulate` command
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    pub devices: u32,
    pub resolution: Option<Resolution>,
    pub switch_to: Option<Resolution>,
    pub record: bool,
    /// Let the recording stop itself after this many seconds
    pub duration: Option<u64>,
    pub audio: bool,
    pub deny: bool,
}

/// Callback observed by the driver
#[derive(Debug)]
enum SessionEvent {
    Attached(UsbDevice),
    Detached(UsbDevice),
    Connected(UsbDevice, bool),
    Disconnected(UsbDevice),
    PermissionTimeout(UsbDevice),
    Preview(bool),
    Recorded(PathBuf),
}

/// Forwards every session callback into a channel
struct ChannelListener {
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelListener {
    fn send(&self, event: SessionEvent) {
        // The receiver only goes away when the driver is done
        let _ = self.events.send(event);
    }
}

impl DeviceConnectListener for ChannelListener {
    fn on_attach_dev(&self, device: &UsbDevice) {
        self.send(SessionEvent::Attached(device.clone()));
    }

    fn on_detach_dev(&self, device: &UsbDevice) {
        self.send(SessionEvent::Detached(device.clone()));
    }

    fn on_connect_dev(&self, device: &UsbDevice, connected: bool) {
        self.send(SessionEvent::Connected(device.clone(), connected));
    }

    fn on_disconnect_dev(&self, device: &UsbDevice) {
        self.send(SessionEvent::Disconnected(device.clone()));
    }

    fn on_permission_timeout(&self, device: &UsbDevice) {
        self.send(SessionEvent::PermissionTimeout(device.clone()));
    }
}

impl PreviewListener for ChannelListener {
    fn on_preview_result(&self, success: bool) {
        self.send(SessionEvent::Preview(success));
    }
}

impl RecordingListener for ChannelListener {
    fn on_record_result(&self, path: &Path) {
        self.send(SessionEvent::Recorded(path.to_path_buf()));
    }
}

/// Render target that only reports what it is asked to do
struct ConsoleSurface;

impl RenderTarget for ConsoleSurface {
    fn surface_id(&self) -> u64 {
        1
    }

    fn set_aspect_ratio(&self, ratio: f64) {
        println!("  surface aspect ratio -> {:.3}", ratio);
    }
}

/// Load the configuration from `path`, or the default location
pub fn load_config(path: Option<&Path>) -> Result<SessionConfig, Box<dyn std::error::Error>> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match SessionConfig::default_path() {
            Ok(path) => path,
            Err(_) => return Ok(SessionConfig::default()),
        },
    };
    Ok(SessionConfig::load_or_default(&path)?)
}

/// List the devices a session sees with `devices` simulated cameras plugged in
pub fn list_devices(
    config: SessionConfig,
    devices: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let sim = SimulatedBackend::new();
    for id in 1..=devices {
        sim.plug(SimulatedBackend::uvc_device(id));
    }

    let (events, _rx) = mpsc::unbounded_channel();
    let session = SessionManager::new(Arc::new(sim), config);
    session.initialize(Some(Arc::new(ConsoleSurface)), Arc::new(ChannelListener { events }))?;

    let visible = session.devices();
    if visible.is_empty() {
        println!("No matching devices.");
        return Ok(());
    }

    println!("Matching devices:");
    println!();
    for (index, device) in visible.iter().enumerate() {
        println!("  [{}] {}", index, device);
        println!("      Path: {}", device.name);
    }

    session.release_all();
    Ok(())
}

/// Replay attach → permission → connect → capture/record → detach
pub fn simulate(
    mut config: SessionConfig,
    options: SimulateOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(resolution) = options.resolution {
        config.resolution = resolution;
    }
    if options.deny && config.permission_timeout_ms.is_none() {
        config.permission_timeout_ms = Some(DENY_TIMEOUT_MS);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_scenario(config, options))
}

async fn run_scenario(
    config: SessionConfig,
    options: SimulateOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let capture_dir = config
        .capture_dir
        .clone()
        .unwrap_or_else(storage::default_capture_dir);

    let sim = SimulatedBackend::new();
    sim.set_permission_policy(if options.deny {
        PermissionPolicy::Deny
    } else {
        PermissionPolicy::Manual
    });

    let (tx, mut events) = mpsc::unbounded_channel();
    let listener = Arc::new(ChannelListener { events: tx });
    let session = SessionManager::new(Arc::new(sim.clone()), config);

    println!("[{}] initializing at {}", Local::now().format("%H:%M:%S"), session.resolution());
    session.initialize(Some(Arc::new(ConsoleSurface)), listener.clone())?;
    session.register_monitoring()?;
    println!("  state: {}", session.state());

    // Plug the cameras from a separate task, like an OS callback thread
    let plugger = sim.clone();
    let device_count = options.devices.max(1);
    tokio::spawn(async move {
        for id in 1..=device_count {
            tokio::time::sleep(SIMULATED_EVENT_DELAY).await;
            plugger.plug(SimulatedBackend::uvc_device(id));
        }
    });
    for _ in 0..device_count {
        wait_for(&mut events, |e| matches!(e, SessionEvent::Attached(_))).await?;
    }

    println!("  {} device(s) visible", session.device_count());
    session.request_permission(0)?;
    println!("  permission requested for device 0");

    if options.deny {
        wait_for(&mut events, |e| matches!(e, SessionEvent::PermissionTimeout(_))).await?;
        println!("  no answer from the user, giving up");
        session.release_all();
        println!("  state: {}", session.state());
        return Ok(());
    }

    let granter = sim.clone();
    tokio::spawn(async move {
        tokio::time::sleep(SIMULATED_EVENT_DELAY).await;
        granter.grant_pending();
    });
    let connected = wait_for(&mut events, |e| matches!(e, SessionEvent::Connected(..))).await?;
    if !matches!(connected, SessionEvent::Connected(_, true)) {
        return Err("camera failed to start preview".into());
    }
    println!("  state: {}", session.state());

    let picture = storage::timestamped_path(&capture_dir, PICTURE_PREFIX, SUFFIX_PNG);
    session.capture_picture(&picture)?;
    println!("  still -> {}", picture.display());

    if options.record {
        let video = storage::timestamped_path(&capture_dir, VIDEO_PREFIX, SUFFIX_MP4);
        let mut params = RecordParams::new(&video).with_audio(options.audio);
        if let Some(secs) = options.duration {
            params = params.with_duration(Duration::from_secs(secs));
        }
        session.start_recording(params, listener.clone())?;
        println!("  recording -> {} (state: {})", video.display(), session.state());
    }

    if let Some(target) = options.switch_to {
        let preview: Arc<dyn PreviewListener> = listener.clone();
        let change = session.change_resolution(target.width, target.height, Some(preview))?;
        println!("  resolution change to {}: {:?}", target, change);
        if change == ResolutionChange::Rebuilt {
            wait_for(&mut events, |e| matches!(e, SessionEvent::Preview(_))).await?;
        }
        println!("  state: {}", session.state());
    }

    if let (true, Some(secs), None) = (options.record, options.duration, options.switch_to) {
        println!("  waiting {}s for the recording to stop", secs);
        let timeout = Duration::from_secs(secs) + EVENT_TIMEOUT;
        wait_for_within(&mut events, timeout, |e| matches!(e, SessionEvent::Recorded(_))).await?;
        println!("  state: {}", session.state());
    } else if options.record {
        match session.stop_recording() {
            Ok(()) => {
                wait_for(&mut events, |e| matches!(e, SessionEvent::Recorded(_))).await?;
            }
            Err(SessionError::NoRecordingInProgress) => {
                println!("  recording was dropped by the resolution change");
            }
            Err(e) => return Err(e.into()),
        }
    }

    let unplugger = sim.clone();
    tokio::spawn(async move {
        tokio::time::sleep(SIMULATED_EVENT_DELAY).await;
        unplugger.unplug(1);
    });
    wait_for(&mut events, |e| matches!(e, SessionEvent::Detached(_))).await?;

    let stats = sim.stats();
    println!("  state: {}", session.state());
    println!();
    println!(
        "Pipelines created {}, released {}, max open at once {}",
        stats.pipelines_created, stats.pipelines_released, stats.max_open
    );
    println!(
        "Monitors created {}, destroyed {}",
        stats.monitors_created, stats.monitors_destroyed
    );
    Ok(())
}

/// Print events until one matches `wanted`, and return it
async fn wait_for(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    wanted: impl Fn(&SessionEvent) -> bool,
) -> Result<SessionEvent, Box<dyn std::error::Error>> {
    wait_for_within(events, EVENT_TIMEOUT, wanted).await
}

async fn wait_for_within(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    timeout: Duration,
    wanted: impl Fn(&SessionEvent) -> bool,
) -> Result<SessionEvent, Box<dyn std::error::Error>> {
    loop {
        let event = tokio::time::timeout(timeout, events.recv())
            .await
            .map_err(|_| "timed out waiting for session callback")?
            .ok_or("session listener closed")?;

        println!("[{}] {}", Local::now().format("%H:%M:%S%.3f"), describe(&event));
        if wanted(&event) {
            return Ok(event);
        }
    }
}

fn describe(event: &SessionEvent) -> String {
    match event {
        SessionEvent::Attached(device) => format!("attached {}", device),
        SessionEvent::Detached(device) => format!("detached {}", device),
        SessionEvent::Connected(device, ok) => format!("connected {} (preview ok: {})", device, ok),
        SessionEvent::Disconnected(device) => format!("disconnected {}", device),
        SessionEvent::PermissionTimeout(device) => format!("permission timed out for {}", device),
        SessionEvent::Preview(ok) => format!("preview restarted (ok: {})", ok),
        SessionEvent::Recorded(path) => format!("recording saved to {}", path.display()),
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the session state machine

mod common;

use common::{Event, Fixture, Recorder, Surface};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use usb_camera::backends::camera::EncodedKind;
use usb_camera::backends::simulated::{PermissionPolicy, PreviewPolicy, SimulatedBackend};
use usb_camera::backends::usb::MonitorEvent;
use usb_camera::{
    ControlBlock, DeviceConnectListener, RecordParams, Resolution, ResolutionChange,
    SessionConfig, SessionError, SessionManager, SessionState, UsbDevice,
};

// ===== Initialization =====

#[test]
fn test_initialize_requires_render_target() {
    let sim = SimulatedBackend::new();
    let session = SessionManager::new(Arc::new(sim.clone()), SessionConfig::default());

    let result = session.initialize(None, Recorder::new());
    assert!(matches!(result, Err(SessionError::InvalidArgument(_))));
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(sim.stats().monitors_created, 0);
    assert_eq!(sim.stats().pipelines_created, 0);
}

#[test]
fn test_initialize_builds_monitor_and_idle_pipeline() {
    let fx = Fixture::new();

    assert_eq!(fx.session.state(), SessionState::Monitoring);
    let stats = fx.sim.stats();
    assert_eq!(stats.monitors_created, 1);
    assert_eq!(stats.register_calls, 1);
    assert_eq!(stats.pipelines_created, 1);
    assert_eq!(stats.open_now, 0);

    let pipelines = fx.sim.pipelines();
    assert_eq!(pipelines[0].resolution, Resolution::new(640, 480));
    assert_eq!(fx.surface.last_ratio(), Some(640.0 / 480.0));
}

#[test]
fn test_monitoring_before_initialize_is_not_ready() {
    let session = SessionManager::new(
        Arc::new(SimulatedBackend::new()),
        SessionConfig::default(),
    );

    assert!(matches!(
        session.register_monitoring(),
        Err(SessionError::NotReady(_))
    ));
    assert!(matches!(
        session.unregister_monitoring(),
        Err(SessionError::NotReady(_))
    ));
    assert!(matches!(
        session.request_permission(0),
        Err(SessionError::NotReady(_))
    ));
    assert!(session.devices().is_empty());
}

#[test]
fn test_register_monitoring_is_idempotent() {
    let fx = Fixture::new();

    fx.session.register_monitoring().unwrap();
    fx.session.register_monitoring().unwrap();
    assert_eq!(fx.sim.stats().register_calls, 1);

    fx.session.unregister_monitoring().unwrap();
    fx.session.unregister_monitoring().unwrap();
    assert_eq!(fx.sim.stats().unregister_calls, 1);
}

// ===== Attach and device listing =====

#[test]
fn test_attach_forwards_to_listener_without_state_change() {
    let fx = Fixture::new();

    fx.sim.plug(SimulatedBackend::uvc_device(1));

    assert_eq!(fx.recorder.events(), vec![Event::Attach(1)]);
    assert_eq!(fx.session.state(), SessionState::Monitoring);
    assert_eq!(fx.session.device_count(), 1);
}

#[test]
fn test_unregistered_monitor_hears_nothing() {
    let fx = Fixture::new();
    fx.session.unregister_monitoring().unwrap();

    fx.sim.plug(SimulatedBackend::uvc_device(1));

    assert!(fx.recorder.events().is_empty());
    // The bus can still be listed
    assert_eq!(fx.session.device_count(), 1);
}

#[test]
fn test_devices_apply_filter() {
    let fx = Fixture::new();

    let keyboard = UsbDevice {
        class: 0x03,
        subclass: 0,
        protocol: 0,
        product_name: Some("Keyboard".to_string()),
        ..SimulatedBackend::uvc_device(9)
    };
    fx.sim.plug(keyboard);
    fx.sim.plug(SimulatedBackend::uvc_device(2));

    let devices = fx.session.devices();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].id, 2);
}

// ===== Permission and connect =====

#[test]
fn test_attach_then_connect_opens_camera_and_previews_once() {
    let fx = Fixture::new();

    fx.connect(1);

    assert_eq!(
        fx.recorder.events(),
        vec![Event::Attach(1), Event::Connect(1, true)]
    );
    assert_eq!(fx.session.state(), SessionState::PreviewActive);
    assert!(fx.session.is_camera_opened());
    assert_eq!(fx.session.connected_device().map(|d| d.id), Some(1));

    let stats = fx.sim.stats();
    assert_eq!(stats.open_calls, 1);
    assert_eq!(stats.preview_starts, 1);
    assert_eq!(stats.pipelines_created, 1);

    // The idle pipeline built at initialization is the one opened, with the
    // first connection's control block
    let pipelines = fx.sim.pipelines();
    assert_eq!(pipelines.len(), 1);
    assert_eq!(pipelines[0].opened_with, vec![1]);
    assert_eq!(pipelines[0].preview_starts, 1);
}

#[test]
fn test_request_permission_out_of_range() {
    let fx = Fixture::new();
    fx.sim.plug(SimulatedBackend::uvc_device(1));

    let result = fx.session.request_permission(1);

    assert!(matches!(result, Err(SessionError::InvalidArgument(_))));
    assert_eq!(fx.sim.stats().permission_requests, 0);
    assert!(fx.session.pending_permission().is_none());
    assert_eq!(fx.session.state(), SessionState::Monitoring);
}

#[test]
fn test_pending_permission_cleared_by_grant() {
    let fx = Fixture::new();
    fx.sim.set_permission_policy(PermissionPolicy::Manual);
    fx.sim.plug(SimulatedBackend::uvc_device(1));

    fx.session.request_permission(0).unwrap();
    assert_eq!(fx.session.pending_permission().map(|d| d.id), Some(1));
    assert_eq!(fx.session.state(), SessionState::Monitoring);

    assert_eq!(fx.sim.grant_pending(), 1);
    assert!(fx.session.pending_permission().is_none());
    assert_eq!(fx.recorder.count(&Event::Connect(1, true)), 1);
    assert_eq!(fx.session.state(), SessionState::PreviewActive);
}

#[test]
fn test_cancelled_prompt_is_silent() {
    let fx = Fixture::new();
    fx.sim.set_permission_policy(PermissionPolicy::Cancel);
    fx.sim.plug(SimulatedBackend::uvc_device(1));
    fx.recorder.clear();

    fx.session.request_permission(0).unwrap();

    assert!(fx.recorder.events().is_empty());
    assert!(fx.session.pending_permission().is_none());
    assert_eq!(fx.session.state(), SessionState::Monitoring);
}

#[test]
fn test_denied_permission_stays_silent_without_timeout() {
    let fx = Fixture::new();
    fx.sim.set_permission_policy(PermissionPolicy::Deny);
    fx.sim.plug(SimulatedBackend::uvc_device(1));
    fx.recorder.clear();

    fx.session.request_permission(0).unwrap();
    std::thread::sleep(Duration::from_millis(100));

    assert!(fx.recorder.events().is_empty());
    assert_eq!(fx.session.pending_permission().map(|d| d.id), Some(1));
}

#[test]
fn test_denied_permission_times_out_when_configured() {
    let config = SessionConfig {
        permission_timeout_ms: Some(30),
        ..SessionConfig::default()
    };
    let fx = Fixture::with_config(config);
    fx.sim.set_permission_policy(PermissionPolicy::Deny);
    fx.sim.plug(SimulatedBackend::uvc_device(1));

    fx.session.request_permission(0).unwrap();

    assert!(
        fx.recorder
            .wait_for(&Event::PermissionTimeout(1), Duration::from_secs(2))
    );
    assert!(fx.session.pending_permission().is_none());
    assert_eq!(fx.session.state(), SessionState::Monitoring);
}

#[test]
fn test_timeout_ignored_after_grant() {
    let config = SessionConfig {
        permission_timeout_ms: Some(30),
        ..SessionConfig::default()
    };
    let fx = Fixture::with_config(config);

    fx.connect(1);
    std::thread::sleep(Duration::from_millis(150));

    assert_eq!(fx.recorder.count(&Event::PermissionTimeout(1)), 0);
    assert_eq!(fx.session.state(), SessionState::PreviewActive);
}

#[test]
fn test_second_connect_is_rejected() {
    let fx = Fixture::new();
    fx.connect(1);
    fx.sim.plug(SimulatedBackend::uvc_device(2));

    fx.session.request_permission(1).unwrap();

    assert_eq!(fx.recorder.count(&Event::Connect(2, false)), 1);
    assert_eq!(fx.session.connected_device().map(|d| d.id), Some(1));
    let stats = fx.sim.stats();
    assert_eq!(stats.open_calls, 1);
    assert_eq!(stats.max_open, 1);
}

#[test]
fn test_open_failure_reports_false() {
    let fx = Fixture::new();
    fx.sim.set_open_fails(true);

    fx.connect(1);

    assert_eq!(fx.recorder.count(&Event::Connect(1, false)), 1);
    assert_eq!(fx.session.state(), SessionState::Connected);
    assert!(!fx.session.is_camera_opened());
    assert_eq!(fx.sim.stats().preview_starts, 0);
}

#[test]
fn test_connect_without_file_descriptor_fails() {
    let fx = Fixture::new();
    let device = SimulatedBackend::uvc_device(1);
    fx.sim.plug(device.clone());
    let sink = fx.sim.monitor_sink(0).unwrap();

    sink(MonitorEvent::Connect {
        control_block: ControlBlock::new(device.clone(), 1),
        device,
        create_new: true,
    });

    assert_eq!(fx.recorder.count(&Event::Connect(1, false)), 1);
    assert!(!fx.session.is_camera_opened());
    assert_eq!(fx.sim.stats().open_now, 0);
}

#[test]
fn test_preview_failure_reports_false() {
    let fx = Fixture::new();
    fx.sim.set_preview_policy(PreviewPolicy::Fail);

    fx.connect(1);

    assert_eq!(fx.recorder.count(&Event::Connect(1, false)), 1);
    assert_eq!(fx.session.state(), SessionState::Connected);
    assert!(fx.session.is_camera_opened());
}

#[test]
fn test_deferred_preview_result() {
    let fx = Fixture::new();
    fx.sim.set_preview_policy(PreviewPolicy::Manual);

    fx.connect(1);
    assert_eq!(fx.session.state(), SessionState::PreviewActive);
    assert_eq!(fx.recorder.count(&Event::Connect(1, true)), 0);

    assert_eq!(fx.sim.complete_previews(true), 1);
    assert_eq!(fx.recorder.count(&Event::Connect(1, true)), 1);
}

#[test]
fn test_resolution_change_during_connect_still_reports_connect() {
    let fx = Fixture::new();
    fx.sim.set_preview_policy(PreviewPolicy::Manual);
    fx.connect(1);

    let change = fx.session.change_resolution(1280, 720, None).unwrap();
    assert_eq!(change, ResolutionChange::Rebuilt);

    // The reply for the torn-down pipeline is dropped, the rebuilt one answers
    assert_eq!(fx.sim.complete_previews(true), 2);
    assert_eq!(fx.recorder.count(&Event::Connect(1, true)), 1);
    assert_eq!(fx.recorder.count(&Event::Connect(1, false)), 0);
    assert_eq!(fx.session.state(), SessionState::PreviewActive);
}

#[test]
fn test_failed_restart_during_connect_reports_connect_failure() {
    let fx = Fixture::new();
    fx.sim.set_preview_policy(PreviewPolicy::Manual);
    fx.connect(1);

    fx.session.change_resolution(1280, 720, None).unwrap();
    fx.sim.complete_previews(false);

    assert_eq!(fx.recorder.count(&Event::Connect(1, false)), 1);
    assert_eq!(fx.recorder.count(&Event::Connect(1, true)), 0);
    assert_eq!(fx.session.state(), SessionState::Connected);
}

#[test]
fn test_close_camera_answers_pending_connect() {
    let fx = Fixture::new();
    fx.sim.set_preview_policy(PreviewPolicy::Manual);
    fx.connect(1);

    fx.session.close_camera().unwrap();
    assert_eq!(fx.recorder.count(&Event::Connect(1, false)), 1);

    // The late reply finds nothing waiting for it
    assert_eq!(fx.sim.complete_previews(true), 1);
    assert_eq!(fx.recorder.count(&Event::Connect(1, true)), 0);
    assert_eq!(fx.session.state(), SessionState::Connected);
}

// ===== Disconnect and detach =====

#[test]
fn test_disconnect_is_informational() {
    let fx = Fixture::new();
    fx.connect(1);
    let sink = fx.sim.monitor_sink(0).unwrap();

    let device = SimulatedBackend::uvc_device(1);
    sink(MonitorEvent::Disconnect {
        control_block: ControlBlock::new(device.clone(), 1),
        device,
    });

    // The camera closes, but nothing is released until detach
    assert_eq!(fx.recorder.events().last(), Some(&Event::Disconnect(1)));
    assert_eq!(fx.session.state(), SessionState::Monitoring);
    assert!(!fx.session.is_camera_opened());
    assert!(fx.session.connected_device().is_none());

    let stats = fx.sim.stats();
    assert_eq!(stats.open_now, 0);
    assert_eq!(stats.pipelines_released, 0);
    assert_eq!(stats.monitors_destroyed, 0);
}

#[test]
fn test_disconnect_of_other_connection_keeps_camera() {
    let fx = Fixture::new();
    fx.connect(1);
    let sink = fx.sim.monitor_sink(0).unwrap();

    let device = SimulatedBackend::uvc_device(1);
    sink(MonitorEvent::Disconnect {
        control_block: ControlBlock::new(device.clone(), 7),
        device,
    });

    assert_eq!(fx.recorder.count(&Event::Disconnect(1)), 1);
    assert_eq!(fx.session.state(), SessionState::PreviewActive);
    assert!(fx.session.is_camera_opened());
}

#[test]
fn test_reconnect_after_disconnect_uses_new_control_block() {
    let fx = Fixture::new();
    fx.connect(1);
    let sink = fx.sim.monitor_sink(0).unwrap();

    let device = SimulatedBackend::uvc_device(1);
    sink(MonitorEvent::Disconnect {
        control_block: ControlBlock::new(device.clone(), 1),
        device: device.clone(),
    });
    sink(MonitorEvent::Connect {
        control_block: ControlBlock::new(device.clone(), 2).with_file_descriptor(102),
        device,
        create_new: true,
    });

    assert_eq!(fx.recorder.count(&Event::Connect(1, true)), 2);
    assert_eq!(fx.recorder.count(&Event::Connect(1, false)), 0);
    assert_eq!(fx.session.state(), SessionState::PreviewActive);

    fx.session.change_resolution(1280, 720, None).unwrap();

    let pipelines = fx.sim.pipelines();
    let live: Vec<_> = pipelines.iter().filter(|p| !p.released).collect();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].opened_with, vec![2]);
    assert_eq!(fx.sim.stats().max_open, 1);
}

#[test]
fn test_detach_releases_everything() {
    let fx = Fixture::new();
    fx.connect(1);
    fx.recorder.clear();

    fx.sim.unplug(1);

    assert_eq!(
        fx.recorder.events(),
        vec![Event::Disconnect(1), Event::Detach(1)]
    );
    assert_eq!(fx.session.state(), SessionState::Idle);
    assert!(fx.session.connected_device().is_none());

    let stats = fx.sim.stats();
    assert_eq!(stats.open_now, 0);
    assert_eq!(stats.pipelines_released, stats.pipelines_created);
    assert_eq!(stats.monitors_destroyed, 1);
}

#[test]
fn test_detach_from_monitoring_releases_everything() {
    let fx = Fixture::new();
    fx.sim.plug(SimulatedBackend::uvc_device(1));

    fx.sim.unplug(1);

    assert_eq!(fx.session.state(), SessionState::Idle);
    let stats = fx.sim.stats();
    assert_eq!(stats.pipelines_released, 1);
    assert_eq!(stats.monitors_destroyed, 1);
}

#[test]
fn test_detach_while_recording() {
    let fx = Fixture::new();
    fx.connect(1);
    fx.session
        .start_recording(RecordParams::new("/tmp/clip.mp4"), fx.recorder.clone())
        .unwrap();
    assert_eq!(fx.session.state(), SessionState::Recording);
    fx.recorder.clear();

    fx.sim.unplug(1);

    let events = fx.recorder.events();
    assert!(events.contains(&Event::Detach(1)));
    // The unfinished clip is dropped, not finalized
    assert!(!events.iter().any(|e| matches!(e, Event::Recorded(_))));
    assert_eq!(fx.session.state(), SessionState::Idle);
    assert!(!fx.session.is_recording());

    let stats = fx.sim.stats();
    assert_eq!(stats.open_now, 0);
    assert_eq!(stats.close_calls, 1);
    assert_eq!(stats.pipelines_released, stats.pipelines_created);
    assert_eq!(stats.monitors_destroyed, 1);
}

/// Releases the session from inside the detach callback
struct ReleaseOnDetach {
    session: OnceLock<SessionManager>,
    recorder: Arc<Recorder>,
}

impl DeviceConnectListener for ReleaseOnDetach {
    fn on_attach_dev(&self, device: &UsbDevice) {
        self.recorder.on_attach_dev(device);
    }

    fn on_detach_dev(&self, device: &UsbDevice) {
        self.recorder.on_detach_dev(device);
        if let Some(session) = self.session.get() {
            session.release_all();
        }
    }

    fn on_connect_dev(&self, device: &UsbDevice, connected: bool) {
        self.recorder.on_connect_dev(device, connected);
    }

    fn on_disconnect_dev(&self, device: &UsbDevice) {
        self.recorder.on_disconnect_dev(device);
    }
}

#[test]
fn test_release_from_detach_callback() {
    let sim = SimulatedBackend::new();
    let session = SessionManager::new(Arc::new(sim.clone()), SessionConfig::default());
    let recorder = Recorder::new();
    let listener = Arc::new(ReleaseOnDetach {
        session: OnceLock::new(),
        recorder: recorder.clone(),
    });
    let _ = listener.session.set(session.clone());

    session
        .initialize(Some(Surface::new()), listener.clone())
        .unwrap();
    session.register_monitoring().unwrap();
    sim.plug(SimulatedBackend::uvc_device(1));
    session.request_permission(0).unwrap();

    sim.unplug(1);

    assert_eq!(recorder.count(&Event::Detach(1)), 1);
    assert_eq!(session.state(), SessionState::Idle);
    let stats = sim.stats();
    assert_eq!(stats.monitors_destroyed, 1);
    assert_eq!(stats.pipelines_released, stats.pipelines_created);
    assert_eq!(stats.close_calls, 1);
}

#[test]
fn test_release_all_is_idempotent() {
    let fx = Fixture::new();
    fx.connect(1);

    fx.session.release_all();
    fx.session.release_all();

    assert_eq!(fx.session.state(), SessionState::Idle);
    let stats = fx.sim.stats();
    assert_eq!(stats.monitors_destroyed, 1);
    assert_eq!(stats.pipelines_released, 1);
    assert_eq!(stats.close_calls, 1);
}

#[test]
fn test_stale_monitor_events_are_ignored() {
    let fx = Fixture::new();
    fx.session.release_all();
    let stale = fx.sim.monitor_sink(0).unwrap();

    fx.session
        .initialize(Some(fx.surface.clone()), fx.recorder.clone())
        .unwrap();
    fx.session.register_monitoring().unwrap();
    fx.recorder.clear();

    let device = SimulatedBackend::uvc_device(5);
    stale(MonitorEvent::Attach(device.clone()));
    stale(MonitorEvent::Connect {
        control_block: ControlBlock::new(device.clone(), 9).with_file_descriptor(109),
        device: device.clone(),
        create_new: true,
    });
    stale(MonitorEvent::Detach(device));

    assert!(fx.recorder.events().is_empty());
    assert_eq!(fx.session.state(), SessionState::Monitoring);
    assert!(fx.session.connected_device().is_none());
    let stats = fx.sim.stats();
    assert_eq!(stats.open_calls, 0);
    assert_eq!(stats.monitors_destroyed, 1);
}

#[test]
fn test_reinitialize_releases_previous_resources() {
    let fx = Fixture::new();
    fx.connect(1);

    fx.session
        .initialize(Some(fx.surface.clone()), fx.recorder.clone())
        .unwrap();

    assert_eq!(fx.session.state(), SessionState::Monitoring);
    let stats = fx.sim.stats();
    assert_eq!(stats.monitors_created, 2);
    assert_eq!(stats.monitors_destroyed, 1);
    assert_eq!(stats.pipelines_created, 2);
    assert_eq!(stats.pipelines_released, 1);
    assert_eq!(stats.open_now, 0);
}

#[test]
fn test_dropping_last_handle_releases() {
    let fx = Fixture::new();
    fx.connect(1);
    let sim = fx.sim.clone();

    drop(fx);

    let stats = sim.stats();
    assert_eq!(stats.open_now, 0);
    assert_eq!(stats.monitors_destroyed, 1);
    assert_eq!(stats.pipelines_released, stats.pipelines_created);
}

// ===== Resolution changes =====

#[test]
fn test_same_resolution_is_noop() {
    let fx = Fixture::new();
    fx.connect(1);
    fx.recorder.clear();

    let change = fx
        .session
        .change_resolution(640, 480, Some(fx.preview_listener()))
        .unwrap();

    assert_eq!(change, ResolutionChange::Unchanged);
    assert!(fx.recorder.events().is_empty());
    let stats = fx.sim.stats();
    assert_eq!(stats.pipelines_created, 1);
    assert_eq!(stats.close_calls, 0);
}

#[test]
fn test_invalid_resolution_rejected() {
    let fx = Fixture::new();

    let result = fx.session.change_resolution(0, 720, None);

    assert!(matches!(result, Err(SessionError::InvalidArgument(_))));
    assert_eq!(fx.session.resolution(), Resolution::new(640, 480));
}

#[test]
fn test_resolution_before_initialize_is_deferred() {
    let sim = SimulatedBackend::new();
    let session = SessionManager::new(Arc::new(sim.clone()), SessionConfig::default());

    let change = session.change_resolution(1280, 720, None).unwrap();
    assert_eq!(change, ResolutionChange::Deferred);
    assert_eq!(sim.stats().pipelines_created, 0);

    session
        .initialize(Some(Surface::new()), Recorder::new())
        .unwrap();
    assert_eq!(sim.pipelines()[0].resolution, Resolution::new(1280, 720));
}

#[test]
fn test_resolution_change_while_monitoring_rebuilds_idle_pipeline() {
    let fx = Fixture::new();

    let change = fx.session.change_resolution(1280, 720, None).unwrap();

    assert_eq!(change, ResolutionChange::Rebuilt);
    assert_eq!(fx.session.state(), SessionState::Monitoring);
    let pipelines = fx.sim.pipelines();
    assert_eq!(pipelines.len(), 2);
    assert!(pipelines[0].released);
    assert_eq!(pipelines[1].resolution, Resolution::new(1280, 720));
    assert!(pipelines[1].opened_with.is_empty());
}

#[test]
fn test_resolution_change_while_previewing() {
    let fx = Fixture::new();
    fx.connect(1);
    fx.recorder.clear();

    let change = fx
        .session
        .change_resolution(1280, 720, Some(fx.preview_listener()))
        .unwrap();

    assert_eq!(change, ResolutionChange::Rebuilt);
    assert_eq!(fx.recorder.events(), vec![Event::Preview(true)]);
    assert_eq!(fx.session.state(), SessionState::PreviewActive);
    assert_eq!(fx.session.resolution(), Resolution::new(1280, 720));
    assert_eq!(fx.surface.last_ratio(), Some(1280.0 / 720.0));

    let pipelines = fx.sim.pipelines();
    assert_eq!(pipelines.len(), 2);
    assert!(pipelines[0].released);
    assert_eq!(pipelines[1].resolution, Resolution::new(1280, 720));
    // Reopened with the same control block
    assert_eq!(pipelines[1].opened_with, vec![1]);
    assert_eq!(fx.sim.stats().max_open, 1);
}

#[test]
fn test_resolution_change_while_recording_stops_recording() {
    let fx = Fixture::new();
    fx.connect(1);
    fx.session
        .start_recording(RecordParams::new("/tmp/clip.mp4"), fx.recorder.clone())
        .unwrap();

    let change = fx.session.change_resolution(1920, 1080, None).unwrap();

    assert_eq!(change, ResolutionChange::Rebuilt);
    assert_eq!(fx.session.state(), SessionState::PreviewActive);
    assert!(!fx.session.is_recording());
    assert!(matches!(
        fx.session.stop_recording(),
        Err(SessionError::NoRecordingInProgress)
    ));

    let pipelines = fx.sim.pipelines();
    let live: Vec<_> = pipelines.iter().filter(|p| !p.released).collect();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].resolution, Resolution::new(1920, 1080));
    assert_eq!(fx.sim.stats().max_open, 1);
}

#[test]
fn test_stale_preview_result_is_discarded() {
    let fx = Fixture::new();
    fx.sim.set_preview_policy(PreviewPolicy::Manual);
    fx.connect(1);
    fx.recorder.clear();

    fx.session
        .change_resolution(1280, 720, Some(fx.preview_listener()))
        .unwrap();

    // One reply from the torn-down pipeline, one from its replacement
    assert_eq!(fx.sim.complete_previews(true), 2);
    assert_eq!(fx.recorder.events(), vec![Event::Connect(1, true), Event::Preview(true)]);
}

#[test]
fn test_preview_result_after_release_is_discarded() {
    let fx = Fixture::new();
    fx.sim.set_preview_policy(PreviewPolicy::Manual);
    fx.connect(1);
    fx.session.release_all();
    fx.recorder.clear();

    assert_eq!(fx.sim.complete_previews(true), 1);
    assert!(fx.recorder.events().is_empty());
    assert_eq!(fx.session.state(), SessionState::Idle);
}

// ===== Capture and recording =====

#[test]
fn test_capture_requires_open_camera() {
    let fx = Fixture::new();

    let result = fx.session.capture_picture(&PathBuf::from("/tmp/still.png"));
    assert!(matches!(result, Err(SessionError::NotReady(_))));

    fx.connect(1);
    fx.session
        .capture_picture(&PathBuf::from("/tmp/still.png"))
        .unwrap();
    assert_eq!(fx.sim.stats().stills, vec![PathBuf::from("/tmp/still.png")]);
}

#[test]
fn test_recording_round_trip() {
    let fx = Fixture::new();
    fx.connect(1);
    fx.recorder.clear();

    fx.session
        .start_recording(RecordParams::new("/tmp/clip.mp4"), fx.recorder.clone())
        .unwrap();
    assert_eq!(fx.session.state(), SessionState::Recording);
    assert!(fx.session.is_recording());

    fx.session.stop_recording().unwrap();
    assert_eq!(fx.session.state(), SessionState::PreviewActive);
    assert_eq!(
        fx.recorder.events(),
        vec![
            Event::Encoded(EncodedKind::Video),
            Event::Recorded(PathBuf::from("/tmp/clip.mp4"))
        ]
    );
}

#[test]
fn test_recording_with_audio_emits_both_tracks() {
    let fx = Fixture::new();
    fx.connect(1);
    fx.recorder.clear();

    let params = RecordParams::new("/tmp/clip.mp4").with_audio(true);
    fx.session.start_recording(params, fx.recorder.clone()).unwrap();
    fx.session.stop_recording().unwrap();

    let events = fx.recorder.events();
    assert!(events.contains(&Event::Encoded(EncodedKind::Video)));
    assert!(events.contains(&Event::Encoded(EncodedKind::Audio)));
}

#[test]
fn test_recording_stops_after_duration() {
    let fx = Fixture::new();
    fx.connect(1);

    let params = RecordParams::new("/tmp/timed.mp4").with_duration(Duration::from_millis(30));
    fx.session.start_recording(params, fx.recorder.clone()).unwrap();

    let done = Event::Recorded(PathBuf::from("/tmp/timed.mp4"));
    assert!(fx.recorder.wait_for(&done, Duration::from_secs(2)));
    assert!(!fx.session.is_recording());
    assert_eq!(fx.session.state(), SessionState::PreviewActive);
    assert!(matches!(
        fx.session.stop_recording(),
        Err(SessionError::NoRecordingInProgress)
    ));
    assert_eq!(fx.sim.stats().recordings_stopped, 1);
}

#[test]
fn test_duplicate_recording_calls_do_not_reach_pipeline() {
    let fx = Fixture::new();
    fx.connect(1);

    assert!(matches!(
        fx.session.stop_recording(),
        Err(SessionError::NoRecordingInProgress)
    ));

    fx.session
        .start_recording(RecordParams::new("/tmp/a.mp4"), fx.recorder.clone())
        .unwrap();
    assert!(matches!(
        fx.session
            .start_recording(RecordParams::new("/tmp/b.mp4"), fx.recorder.clone()),
        Err(SessionError::RecordingInProgress)
    ));

    let stats = fx.sim.stats();
    assert_eq!(stats.recordings_started, 1);
    assert_eq!(stats.recordings_stopped, 0);
}

#[test]
fn test_recording_requires_preview() {
    let fx = Fixture::new();

    let result = fx
        .session
        .start_recording(RecordParams::new("/tmp/clip.mp4"), fx.recorder.clone());
    assert!(matches!(result, Err(SessionError::NotReady(_))));

    fx.connect(1);
    fx.session.close_camera().unwrap();
    let result = fx
        .session
        .start_recording(RecordParams::new("/tmp/clip.mp4"), fx.recorder.clone());
    assert!(matches!(result, Err(SessionError::NotReady(_))));
    assert_eq!(fx.sim.stats().recordings_started, 0);
}

#[test]
fn test_close_camera_keeps_connection() {
    let fx = Fixture::new();
    fx.connect(1);

    fx.session.close_camera().unwrap();

    assert_eq!(fx.session.state(), SessionState::Connected);
    assert!(!fx.session.is_camera_opened());
    assert_eq!(fx.session.connected_device().map(|d| d.id), Some(1));
    assert_eq!(fx.sim.stats().open_now, 0);
}

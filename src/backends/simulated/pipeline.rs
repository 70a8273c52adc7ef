// SPDX-License-Identifier: MPL-2.0

//! Simulated camera pipeline

use super::{PreviewPolicy, SharedWorld, lock_world};
use crate::backends::camera::{
    BackendError, BackendResult, CameraPipeline, EncodedChunk, EncodedKind, PipelineConfig,
    PreviewReply, RecordParams, RecordingListener, RenderTarget, Resolution,
};
use crate::backends::usb::ControlBlock;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

struct ActiveRecording {
    serial: u64,
    params: RecordParams,
    listener: Box<dyn RecordingListener>,
}

type RecordingSlot = Arc<Mutex<Option<ActiveRecording>>>;

fn lock_recording(slot: &RecordingSlot) -> MutexGuard<'_, Option<ActiveRecording>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Finalize `recording` and tell its listener
fn finish(world: &SharedWorld, recording: ActiveRecording) {
    lock_world(world).stats.recordings_stopped += 1;
    recording
        .listener
        .on_record_result(&recording.params.output_path);
}

/// Camera pipeline backed by the simulated world
///
/// Frames are never produced; the pipeline only tracks which operations were
/// called and in which state.
pub struct SimulatedPipeline {
    id: u64,
    config: PipelineConfig,
    world: SharedWorld,
    /// Connection serial of the control block it was opened with
    opened: Option<u64>,
    /// Shared with the auto-stop timer of a recording with a duration
    recording: RecordingSlot,
    next_recording: u64,
    released: bool,
}

impl SimulatedPipeline {
    pub(crate) fn new(id: u64, config: PipelineConfig, world: SharedWorld) -> Self {
        Self {
            id,
            config,
            world,
            opened: None,
            recording: Arc::new(Mutex::new(None)),
            next_recording: 1,
            released: false,
        }
    }

    fn mark_closed(&mut self) {
        if self.opened.take().is_some() {
            let mut world = lock_world(&self.world);
            world.stats.open_now -= 1;
            world.stats.close_calls += 1;
        }
    }

    /// Stop recording `serial` after `duration`, unless it was stopped already
    fn arm_auto_stop(&self, serial: u64, duration: Duration) {
        let slot = Arc::clone(&self.recording);
        let world = Arc::clone(&self.world);
        let pipeline = self.id;

        let spawned = std::thread::Builder::new()
            .name("sim-record-timer".to_string())
            .spawn(move || {
                std::thread::sleep(duration);
                let recording = lock_recording(&slot).take_if(|r| r.serial == serial);
                if let Some(recording) = recording {
                    debug!(pipeline, serial, "Simulated recording reached its duration");
                    finish(&world, recording);
                }
            });

        if let Err(e) = spawned {
            warn!(error = %e, "Failed to arm recording timer");
        }
    }
}

impl CameraPipeline for SimulatedPipeline {
    fn open(&mut self, control_block: &ControlBlock) -> BackendResult<()> {
        if self.released {
            return Err(BackendError::OpenFailed("pipeline released".to_string()));
        }
        if self.opened.is_some() {
            return Ok(());
        }

        let mut world = lock_world(&self.world);
        world.stats.open_calls += 1;
        if world.open_fails {
            return Err(BackendError::OpenFailed(format!(
                "simulated failure opening {}",
                control_block.device().name
            )));
        }
        let fd = control_block.file_descriptor().ok_or_else(|| {
            BackendError::OpenFailed(format!(
                "no file descriptor for {}",
                control_block.device().name
            ))
        })?;

        self.opened = Some(control_block.connection());
        world.stats.open_now += 1;
        world.stats.max_open = world.stats.max_open.max(world.stats.open_now);
        if let Some(record) = world.pipeline_mut(self.id) {
            record.opened_with.push(control_block.connection());
        }

        debug!(
            pipeline = self.id,
            connection = control_block.connection(),
            fd,
            format = %self.config.preview_format,
            "Simulated pipeline opened"
        );
        Ok(())
    }

    fn close(&mut self) {
        // Closing drops an unfinished recording without finalizing it
        lock_recording(&self.recording).take();
        self.mark_closed();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.close();
        self.released = true;

        let mut world = lock_world(&self.world);
        world.stats.pipelines_released += 1;
        if let Some(record) = world.pipeline_mut(self.id) {
            record.released = true;
        }
    }

    fn start_preview(&mut self, target: &dyn RenderTarget, reply: PreviewReply) {
        if self.opened.is_none() {
            reply.send(false);
            return;
        }

        let policy = {
            let mut world = lock_world(&self.world);
            world.stats.preview_starts += 1;
            if let Some(record) = world.pipeline_mut(self.id) {
                record.preview_starts += 1;
            }
            world.preview_policy
        };

        debug!(pipeline = self.id, surface = target.surface_id(), ?policy, "Simulated preview");

        match policy {
            PreviewPolicy::Succeed => reply.send(true),
            PreviewPolicy::Fail => reply.send(false),
            PreviewPolicy::Manual => lock_world(&self.world).pending_previews.push(reply),
        }
    }

    fn capture_still(&mut self, path: &Path) -> BackendResult<()> {
        if self.opened.is_none() {
            return Err(BackendError::NotOpened);
        }
        lock_world(&self.world).stats.stills.push(path.to_path_buf());
        Ok(())
    }

    fn start_recording(
        &mut self,
        params: RecordParams,
        listener: Box<dyn RecordingListener>,
    ) -> BackendResult<()> {
        if self.opened.is_none() {
            return Err(BackendError::NotOpened);
        }
        let mut slot = lock_recording(&self.recording);
        if slot.is_some() {
            return Err(BackendError::RecordingInProgress);
        }

        lock_world(&self.world).stats.recordings_started += 1;

        // Stand-ins for the codec configuration packets
        listener.on_encode_result(&EncodedChunk {
            kind: EncodedKind::Video,
            data: vec![0, 0, 0, 1],
            timestamp_us: 0,
        });
        if params.record_audio {
            listener.on_encode_result(&EncodedChunk {
                kind: EncodedKind::Audio,
                data: vec![0x12, 0x10],
                timestamp_us: 0,
            });
        }

        let serial = self.next_recording;
        self.next_recording += 1;
        let duration = params.duration;
        *slot = Some(ActiveRecording {
            serial,
            params,
            listener,
        });
        drop(slot);

        if let Some(duration) = duration {
            self.arm_auto_stop(serial, duration);
        }
        Ok(())
    }

    fn stop_recording(&mut self) -> BackendResult<()> {
        let recording = lock_recording(&self.recording)
            .take()
            .ok_or(BackendError::NoRecordingInProgress)?;
        finish(&self.world, recording);
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.opened.is_some()
    }

    fn is_recording(&self) -> bool {
        lock_recording(&self.recording).is_some()
    }

    fn resolution(&self) -> Resolution {
        self.config.resolution
    }
}

impl Drop for SimulatedPipeline {
    fn drop(&mut self) {
        self.mark_closed();
    }
}

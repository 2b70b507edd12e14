/// Simulated camera and volume hardware.
///
/// The daemon has no access to a real front camera or to a phone's volume
/// buttons, so it ships stand-ins that behave like them at the trait
/// boundary:
///   - [`SimulatedCamera`] exposes a front and a back wide-angle sensor with
///     still-image output and completes each capture after a fixed latency.
///   - [`SimulatedVolume`] models the system output level in `[0, 1]`.  Like
///     the real thing, a programmatic write echoes back to subscribers as an
///     explicit change, and a press at either end of the range changes nothing.
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Duration;
use tracing::{debug, info};

use crate::config::{CameraPosition, Lens, SimulationConfig};
use crate::request::Artifact;
use crate::session::{
    CaptureBackend, CaptureCompletion, DeviceHandle, DeviceRequirements, OutputHandle, OutputKind,
};
use crate::trigger::{ChangeReason, LevelSignal, SignalSender, TriggerError};

const PATTERN_WIDTH: usize = 64;
const PATTERN_HEIGHT: usize = 48;

/// One volume-button step, matching the 16-step hardware scale.
pub const VOLUME_STEP: f32 = 1.0 / 16.0;

// ── Camera ────────────────────────────────────────────────────────────────────

pub struct SimulatedCamera {
    config: SimulationConfig,
    streaming: bool,
    captures: u32,
}

impl SimulatedCamera {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config, streaming: false, captures: 0 }
    }

    fn catalog(&self) -> Vec<DeviceHandle> {
        if !self.config.camera_available {
            return Vec::new();
        }
        vec![
            DeviceHandle { id: "sim-front-wide".into(), position: CameraPosition::Front, lens: Lens::Wide },
            DeviceHandle { id: "sim-back-wide".into(), position: CameraPosition::Back, lens: Lens::Wide },
        ]
    }
}

impl CaptureBackend for SimulatedCamera {
    fn select_device(&mut self, requirements: &DeviceRequirements) -> Option<DeviceHandle> {
        self.catalog()
            .into_iter()
            .find(|d| d.position == requirements.position && d.lens == requirements.lens)
    }

    fn attach_output(&mut self, device: &DeviceHandle, kind: OutputKind) -> Option<OutputHandle> {
        match kind {
            OutputKind::StillImage => Some(OutputHandle { id: format!("{}-still", device.id), kind }),
        }
    }

    fn start_stream(&mut self) -> anyhow::Result<()> {
        if !self.config.camera_available {
            anyhow::bail!("simulated camera is not available");
        }
        self.streaming = true;
        info!("simulated stream started");
        Ok(())
    }

    fn stop_stream(&mut self) {
        if !self.streaming {
            return;
        }
        self.streaming = false;
        info!("simulated stream stopped");
    }

    fn submit(&mut self, completion: CaptureCompletion) {
        self.captures += 1;
        let frame = self.captures;
        let fail = self.config.fail_every > 0 && frame % self.config.fail_every == 0;
        let latency = Duration::from_millis(self.config.capture_latency_ms);
        debug!(request = %completion.id(), frame, "simulated exposure");

        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            if fail {
                completion.fail(format!("simulated sensor fault on frame {frame}"));
            } else {
                completion.succeed(test_pattern(frame));
            }
        });
    }
}

/// A small binary PPM gradient whose hue shifts with `frame`.
pub fn test_pattern(frame: u32) -> Artifact {
    let header = format!("P6\n{PATTERN_WIDTH} {PATTERN_HEIGHT}\n255\n");
    let mut data = Vec::with_capacity(header.len() + PATTERN_WIDTH * PATTERN_HEIGHT * 3);
    data.extend_from_slice(header.as_bytes());
    let shift = (frame.wrapping_mul(37) % 256) as usize;
    for y in 0..PATTERN_HEIGHT {
        for x in 0..PATTERN_WIDTH {
            data.push(((x * 4 + shift) % 256) as u8);
            data.push(((y * 5 + shift) % 256) as u8);
            data.push(((x + y + shift) % 256) as u8);
        }
    }
    Artifact { data, extension: "ppm" }
}

// ── Volume ────────────────────────────────────────────────────────────────────

struct VolumeState {
    level: f32,
    sender: Option<SignalSender>,
}

impl VolumeState {
    fn set(&mut self, level: f32) {
        let level = level.clamp(0.0, 1.0);
        if (level - self.level).abs() < f32::EPSILON {
            return;
        }
        self.level = level;
        if let Some(sender) = &self.sender {
            sender.notify(level, ChangeReason::Explicit);
        }
    }
}

#[derive(Clone)]
pub struct SimulatedVolume {
    state: Arc<Mutex<VolumeState>>,
}

impl SimulatedVolume {
    pub fn new(level: f32) -> Self {
        Self {
            state: Arc::new(Mutex::new(VolumeState { level: level.clamp(0.0, 1.0), sender: None })),
        }
    }

    pub fn level(&self) -> f32 {
        self.state.lock().level
    }

    /// The physical buttons for this volume.
    pub fn buttons(&self) -> VolumeButtons {
        VolumeButtons { state: Arc::clone(&self.state) }
    }
}

impl LevelSignal for SimulatedVolume {
    fn subscribe(&mut self, sender: SignalSender) -> Result<(), TriggerError> {
        self.state.lock().sender = Some(sender);
        Ok(())
    }

    fn unsubscribe(&mut self) {
        self.state.lock().sender = None;
    }

    fn write_level(&mut self, level: f32) -> Result<(), TriggerError> {
        if !level.is_finite() {
            return Err(TriggerError::WriteFailed(format!("level {level} is not finite")));
        }
        self.state.lock().set(level);
        Ok(())
    }
}

/// Side buttons acting on a [`SimulatedVolume`].
#[derive(Clone)]
pub struct VolumeButtons {
    state: Arc<Mutex<VolumeState>>,
}

impl VolumeButtons {
    /// Presses volume-up; returns the resulting level.
    pub fn press_up(&self) -> f32 {
        self.step(VOLUME_STEP)
    }

    pub fn press_down(&self) -> f32 {
        self.step(-VOLUME_STEP)
    }

    fn step(&self, delta: f32) -> f32 {
        let mut state = self.state.lock();
        let target = state.level + delta;
        state.set(target);
        state.level
    }
}

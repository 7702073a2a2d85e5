//! Scriptable in-memory capture backend.

use super::synthetic_data::{solid_frame, synthetic_video_frame};
use crate::errors::CameraError;
use crate::platform::{CaptureBackend, CaptureHandle, DeviceProvider};
use crate::types::{DeviceIdentity, FormatTag, ModeDescriptor, PixelLayout, RawFrame};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Outcome of one scripted `read_frame` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStep {
    Frame,
    Miss,
}

/// Description of a fake device.
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub index: u32,
    pub name: String,
    pub default_resolution: (u32, u32),
    /// Modes the fake driver actually switches to when asked. Any other
    /// request drops the device back to its default resolution.
    pub honored: Vec<ModeDescriptor>,
    /// Modes whose configure call errors out.
    pub failing_configures: Vec<ModeDescriptor>,
    /// Opens that fail before one succeeds; `u32::MAX` never opens.
    pub busy_opens: u32,
    pub layout: PixelLayout,
    pub fill: Option<[u8; 3]>,
}

impl MockDevice {
    pub fn new(index: u32, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            default_resolution: (640, 480),
            honored: Vec::new(),
            failing_configures: Vec::new(),
            busy_opens: 0,
            layout: PixelLayout::Rgb8,
            fill: None,
        }
    }

    pub fn with_default_resolution(mut self, width: u32, height: u32) -> Self {
        self.default_resolution = (width, height);
        self
    }

    pub fn honoring(mut self, modes: &[(FormatTag, u32, u32)]) -> Self {
        self.honored.extend(
            modes
                .iter()
                .filter_map(|(f, w, h)| ModeDescriptor::new(*f, *w, *h).ok()),
        );
        self
    }

    pub fn failing_configure(mut self, format: FormatTag, width: u32, height: u32) -> Self {
        if let Ok(mode) = ModeDescriptor::new(format, width, height) {
            self.failing_configures.push(mode);
        }
        self
    }

    pub fn busy_for(mut self, attempts: u32) -> Self {
        self.busy_opens = attempts;
        self
    }

    pub fn always_busy(self) -> Self {
        self.busy_for(u32::MAX)
    }

    pub fn with_layout(mut self, layout: PixelLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_fill(mut self, rgb: [u8; 3]) -> Self {
        self.fill = Some(rgb);
        self
    }

    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.index, self.name.clone())
    }
}

struct DeviceState {
    desc: MockDevice,
    busy_remaining: u32,
    reads: VecDeque<ReadStep>,
    frames_served: u64,
}

impl DeviceState {
    fn new(desc: MockDevice) -> Self {
        Self {
            busy_remaining: desc.busy_opens,
            desc,
            reads: VecDeque::new(),
            frames_served: 0,
        }
    }
}

#[derive(Default)]
struct State {
    devices: Vec<DeviceState>,
    attempts: Vec<(u32, Instant)>,
    open_handles: usize,
}

impl State {
    fn device_mut(&mut self, index: u32) -> Option<&mut DeviceState> {
        self.devices.iter_mut().find(|d| d.desc.index == index)
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fake backend; clones share the same device table.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<State>>,
}

impl MockBackend {
    pub fn new(devices: Vec<MockDevice>) -> Self {
        let backend = Self::default();
        backend.replace_devices(devices);
        backend
    }

    /// Swap the attached hardware, as if devices were unplugged and
    /// replugged. Open handles to vanished devices start failing.
    pub fn replace_devices(&self, devices: Vec<MockDevice>) {
        let mut state = lock(&self.state);
        state.devices = devices.into_iter().map(DeviceState::new).collect();
    }

    pub fn devices(&self) -> Vec<DeviceIdentity> {
        let state = lock(&self.state);
        let mut devices: Vec<_> = state.devices.iter().map(|d| d.desc.identity()).collect();
        devices.sort_by_key(|d| d.index);
        devices
    }

    /// Queue read outcomes for a device; once drained, reads succeed.
    pub fn script_reads(&self, index: u32, steps: &[ReadStep]) {
        let mut state = lock(&self.state);
        if let Some(device) = state.device_mut(index) {
            device.reads.extend(steps.iter().copied());
        }
    }

    /// Instants of every open attempt against `index`, successful or not.
    pub fn open_attempts(&self, index: u32) -> Vec<Instant> {
        lock(&self.state)
            .attempts
            .iter()
            .filter(|(i, _)| *i == index)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn total_open_attempts(&self) -> usize {
        lock(&self.state).attempts.len()
    }

    pub fn clear_open_attempts(&self) {
        lock(&self.state).attempts.clear();
    }

    /// Handles opened and not yet released.
    pub fn open_handles(&self) -> usize {
        lock(&self.state).open_handles
    }

    pub fn frames_served(&self, index: u32) -> u64 {
        lock(&self.state)
            .devices
            .iter()
            .find(|d| d.desc.index == index)
            .map(|d| d.frames_served)
            .unwrap_or(0)
    }

    /// Provider that lists this backend's devices with their real names.
    pub fn provider(&self) -> MockProvider {
        MockProvider {
            state: Some(self.state.clone()),
        }
    }
}

impl CaptureBackend for MockBackend {
    fn open(&self, index: u32) -> Result<Box<dyn CaptureHandle>, CameraError> {
        let mut state = lock(&self.state);
        state.attempts.push((index, Instant::now()));

        let device = state
            .device_mut(index)
            .ok_or_else(|| CameraError::DeviceBusy(format!("no device at index {}", index)))?;

        if device.busy_remaining > 0 {
            if device.busy_remaining != u32::MAX {
                device.busy_remaining -= 1;
            }
            return Err(CameraError::DeviceBusy(format!(
                "{} is held by another client",
                device.desc.name
            )));
        }

        let resolution = device.desc.default_resolution;
        state.open_handles += 1;
        Ok(Box::new(MockHandle {
            state: self.state.clone(),
            index,
            resolution,
            released: false,
        }))
    }
}

struct MockHandle {
    state: Arc<Mutex<State>>,
    index: u32,
    resolution: (u32, u32),
    released: bool,
}

impl CaptureHandle for MockHandle {
    fn configure(&mut self, format: FormatTag, width: u32, height: u32) -> Result<(), CameraError> {
        if self.released {
            return Err(CameraError::StreamError("handle released".into()));
        }
        let mut state = lock(&self.state);
        let device = state
            .device_mut(self.index)
            .ok_or_else(|| CameraError::StreamError("device unplugged".into()))?;

        let requested = ModeDescriptor::new(format, width, height)?;
        if device.desc.failing_configures.contains(&requested) {
            return Err(CameraError::ConfigureError(format!(
                "driver fault configuring {}",
                requested
            )));
        }

        // An honored entry tagged Default stands for a driver that ignores
        // the requested format.
        let honored = device.desc.honored.iter().any(|m| {
            (m.width, m.height) == (width, height)
                && (format == FormatTag::Default
                    || m.format == FormatTag::Default
                    || m.format == format)
        });
        self.resolution = if honored {
            (width, height)
        } else {
            device.desc.default_resolution
        };
        Ok(())
    }

    fn resolution(&self) -> Result<(u32, u32), CameraError> {
        if self.released {
            return Err(CameraError::StreamError("handle released".into()));
        }
        Ok(self.resolution)
    }

    fn read_frame(&mut self) -> Result<RawFrame, CameraError> {
        if self.released {
            return Err(CameraError::StreamError("handle released".into()));
        }
        let mut state = lock(&self.state);
        let device = state
            .device_mut(self.index)
            .ok_or_else(|| CameraError::CaptureError("device unplugged".into()))?;

        if device.reads.pop_front() == Some(ReadStep::Miss) {
            return Err(CameraError::CaptureError("no frame available".into()));
        }

        let (width, height) = self.resolution;
        let frame = match device.desc.fill {
            Some(rgb) => solid_frame(width, height, rgb, device.desc.layout),
            None => synthetic_video_frame(device.frames_served, width, height, device.desc.layout),
        };
        device.frames_served += 1;
        Ok(frame)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            let mut state = lock(&self.state);
            state.open_handles = state.open_handles.saturating_sub(1);
        }
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Device listing backed by a [`MockBackend`], or one that always fails.
pub struct MockProvider {
    state: Option<Arc<Mutex<State>>>,
}

impl MockProvider {
    /// Provider whose enumeration always errors.
    pub fn broken() -> Self {
        Self { state: None }
    }
}

impl DeviceProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn enumerate(&self) -> Result<Vec<DeviceIdentity>, CameraError> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| CameraError::InitializationError("enumeration API unavailable".into()))?;
        let state = lock(state);
        let mut devices: Vec<_> = state.devices.iter().map(|d| d.desc.identity()).collect();
        devices.sort_by_key(|d| d.index);
        Ok(devices)
    }
}

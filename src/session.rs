//! Per-channel capture session.
//!
//! ```text
//! Idle ──start──▶ Opening ──opened──▶ Streaming ──stop──▶ Stopped
//!                    │
//!                    └──attempts exhausted──▶ Failed
//! ```
//!
//! There is no path from Streaming back to Opening: a device that goes away
//! mid-stream just produces read misses until the session is stopped.

use crate::config::SessionConfig;
use crate::errors::CameraError;
use crate::platform::{CaptureBackend, CaptureHandle};
use crate::types::{ChannelId, DeviceIdentity, ModeDescriptor, RawFrame};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Opening,
    Streaming,
    Stopped,
    Failed,
}

pub struct CaptureSession {
    id: Uuid,
    channel: ChannelId,
    state: SessionState,
    device: Option<DeviceIdentity>,
    mode: Option<ModeDescriptor>,
    handle: Option<Box<dyn CaptureHandle>>,
}

impl CaptureSession {
    pub fn new(channel: ChannelId) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel,
            state: SessionState::Idle,
            device: None,
            mode: None,
            handle: None,
        }
    }

    /// Open `device` and switch it to `mode`.
    ///
    /// Blocks for up to `open_attempts` opens separated by the retry delay.
    /// On exhaustion the session ends in [`SessionState::Failed`] and
    /// `DeviceBusy` is returned.
    pub fn start(
        &mut self,
        backend: &dyn CaptureBackend,
        device: DeviceIdentity,
        mode: ModeDescriptor,
        config: &SessionConfig,
    ) -> Result<(), CameraError> {
        if self.state != SessionState::Idle {
            return Err(CameraError::AlreadyRunning);
        }

        self.state = SessionState::Opening;
        self.device = Some(device.clone());
        self.mode = Some(mode);

        let attempts = config.open_attempts;
        let mut handle = None;
        for attempt in 1..=attempts {
            match backend.open(device.index) {
                Ok(opened) => {
                    handle = Some(opened);
                    break;
                }
                Err(e) => {
                    log::debug!(
                        "{} open of {} failed (attempt {}/{}): {}",
                        self.channel,
                        device,
                        attempt,
                        attempts,
                        e
                    );
                    if attempt < attempts {
                        std::thread::sleep(config.retry_delay());
                    }
                }
            }
        }

        let Some(mut handle) = handle else {
            self.state = SessionState::Failed;
            log::warn!(
                "{} could not open {} after {} attempt(s)",
                self.channel,
                device,
                attempts
            );
            return Err(CameraError::DeviceBusy(format!(
                "{} could not be opened after {} attempt(s)",
                device, attempts
            )));
        };

        if !mode.is_default() {
            if let Err(e) = handle.configure(mode.format, mode.width, mode.height) {
                log::warn!("{} keeps driver mode, {} refused: {}", self.channel, mode, e);
            }
        }

        // Flush the negotiation; the first frame after a mode change is
        // often stale or missing.
        if let Err(e) = handle.read_frame() {
            log::debug!("{} discard read missed: {}", self.channel, e);
        }

        self.handle = Some(handle);
        self.state = SessionState::Streaming;
        log::info!(
            "{} streaming {} as {} (session {})",
            self.channel,
            device,
            mode,
            self.id
        );
        Ok(())
    }

    /// Release the device. Safe in any state, any number of times.
    pub fn stop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.release();
            log::info!("{} released (session {})", self.channel, self.id);
        }
        if self.state != SessionState::Failed {
            self.state = SessionState::Stopped;
        }
    }

    /// One frame from the device. Errors are read misses.
    pub fn read_frame(&mut self) -> Result<RawFrame, CameraError> {
        match (&self.state, self.handle.as_mut()) {
            (SessionState::Streaming, Some(handle)) => handle.read_frame(),
            _ => Err(CameraError::NotRunning),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.state == SessionState::Streaming
    }

    pub fn device(&self) -> Option<&DeviceIdentity> {
        self.device.as_ref()
    }

    pub fn mode(&self) -> Option<ModeDescriptor> {
        self.mode
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

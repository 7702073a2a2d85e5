//! Hardware seams.
//!
//! Everything that touches a real device goes through these traits so the
//! probe, session and pipeline logic can run against the nokhwa backend in
//! production and against [`crate::testing::MockBackend`] in tests.

pub mod nokhwa_backend;
pub mod providers;

use crate::errors::CameraError;
use crate::types::{DeviceIdentity, FormatTag, RawFrame};
use std::sync::Arc;

pub use nokhwa_backend::{NokhwaBackend, NokhwaHandle};
pub use providers::{IndexProbeProvider, NativeQueryProvider};

/// Opens capture devices.
///
/// Shared between the control thread and probe workers, hence `Send + Sync`.
/// Handles it returns stay on the thread that opened them.
pub trait CaptureBackend: Send + Sync {
    fn open(&self, index: u32) -> Result<Box<dyn CaptureHandle>, CameraError>;
}

/// An open device.
pub trait CaptureHandle {
    /// Request a format and resolution. The driver may silently substitute
    /// something else; read [`CaptureHandle::resolution`] to find out.
    fn configure(&mut self, format: FormatTag, width: u32, height: u32) -> Result<(), CameraError>;

    /// Width and height the driver currently reports.
    fn resolution(&self) -> Result<(u32, u32), CameraError>;

    /// Read one frame. An error is a miss, not a lost device.
    fn read_frame(&mut self) -> Result<RawFrame, CameraError>;

    /// Give the device back to the OS. Safe to call more than once.
    fn release(&mut self);
}

/// One way of listing attached devices.
pub trait DeviceProvider: Send + Sync {
    fn name(&self) -> &'static str;
    fn enumerate(&self) -> Result<Vec<DeviceIdentity>, CameraError>;
}

/// Providers in priority order: real driver names first, then blind
/// probe-by-index.
pub fn default_providers(
    backend: Arc<dyn CaptureBackend>,
    fallback_max_index: u32,
) -> Vec<Box<dyn DeviceProvider>> {
    vec![
        Box::new(NativeQueryProvider::new()),
        Box::new(IndexProbeProvider::new(backend, fallback_max_index)),
    ]
}

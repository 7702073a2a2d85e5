//! multicam: live preview of up to four cameras whose real capabilities
//! are discovered by probing the hardware.
//!
//! Drivers advertise formats they do not honor and silently fall back to
//! defaults, so every device is opened and asked for each candidate mode
//! before it is offered. Results are cached per device name in a JSON file
//! and reused on later runs.
//!
//! # Features
//! - Device enumeration with a probe-by-index fallback
//! - Empirical format/resolution discovery, off the control thread
//! - Persistent capability cache keyed by device name
//! - Per-channel capture sessions with bounded open retries
//! - Letterboxed per-tick composition for fixed-size display surfaces
//!
//! # Usage
//! ```rust,no_run
//! use multicam::{MultiCamConfig, MultiCamController, RecordingSink, SurfaceSize};
//!
//! multicam::init_logging();
//! let mut controller = MultiCamController::with_native_backend(MultiCamConfig::load_or_default());
//! controller.refresh_devices();
//!
//! let mut sink = RecordingSink::new(SurfaceSize::new(640, 360));
//! if controller.start().is_ok() {
//!     controller.tick(&mut sink);
//!     controller.stop();
//! }
//! ```
pub mod cache;
pub mod catalog;
pub mod config;
pub mod controller;
pub mod display;
pub mod errors;
pub mod pipeline;
pub mod platform;
pub mod probe;
pub mod session;
pub mod types;

// Testing utilities - scriptable backend and synthetic frames
pub mod testing;

// Re-exports for convenience
pub use cache::CapabilityCache;
pub use catalog::DeviceCatalog;
pub use config::MultiCamConfig;
pub use controller::{
    ChannelSlot, ChannelStatus, MultiCamController, StartReport, TickSummary, ToggleOutcome,
};
pub use display::{DisplaySink, DisplayUpdate, RecordingSink};
pub use errors::CameraError;
pub use pipeline::{FramePipeline, TickOutcome};
pub use probe::{CapabilityProbe, ProbeOutcome, ProbeReport, ProbeWorkers};
pub use session::{CaptureSession, SessionState};
pub use types::{
    ChannelId, DeviceIdentity, FormatTag, ModeDescriptor, PixelLayout, RawFrame, SurfaceSize,
    CHANNEL_COUNT,
};

/// Initialize logging for the capture system
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "multicam=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

//! Testing utilities for multicam
//!
//! An in-memory capture backend whose devices can be scripted to be busy,
//! to honor only some modes, or to drop frames, plus synthetic frame data.
//! Lets the probe, session and controller logic run without hardware.

pub mod mock_backend;
pub mod synthetic_data;

pub use mock_backend::{MockBackend, MockDevice, MockProvider, ReadStep};
pub use synthetic_data::{solid_frame, synthetic_video_frame};

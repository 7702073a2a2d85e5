use thiserror::Error;

/// Errors surfaced by the capture, probing and persistence layers.
///
/// Payloads are plain strings so errors stay `Clone` and can be carried
/// across the probe worker boundary inside a report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraError {
    #[error("Camera initialization error: {0}")]
    InitializationError(String),
    #[error("Device busy: {0}")]
    DeviceBusy(String),
    #[error("Capture error: {0}")]
    CaptureError(String),
    #[error("Configure error: {0}")]
    ConfigureError(String),
    #[error("Stream error: {0}")]
    StreamError(String),
    #[error("Cache error: {0}")]
    CacheError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Invalid mode: {0}")]
    InvalidMode(String),
    #[error("Invalid channel: {0}")]
    InvalidChannel(usize),
    #[error("No camera could be opened ({0} channel(s) requested)")]
    NoActiveChannels(usize),
    #[error("Capture is already running")]
    AlreadyRunning,
    #[error("Capture is not running")]
    NotRunning,
}

impl CameraError {
    /// True for failures that a later retry may clear (driver still holding
    /// the device, frame not ready yet).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CameraError::DeviceBusy(_) | CameraError::CaptureError(_) | CameraError::StreamError(_)
        )
    }
}

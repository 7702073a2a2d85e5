//! Device enumeration providers.

use super::{CaptureBackend, DeviceProvider};
use crate::errors::CameraError;
use crate::types::DeviceIdentity;
use nokhwa::{native_api_backend, query, utils::CameraIndex};
use std::sync::Arc;

/// Lists devices with their real driver names through the OS capture API.
#[derive(Debug, Default)]
pub struct NativeQueryProvider;

impl NativeQueryProvider {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceProvider for NativeQueryProvider {
    fn name(&self) -> &'static str {
        "native-query"
    }

    fn enumerate(&self) -> Result<Vec<DeviceIdentity>, CameraError> {
        let backend = native_api_backend().ok_or_else(|| {
            CameraError::InitializationError("No native capture backend on this platform".into())
        })?;

        let cameras = query(backend).map_err(|e| {
            CameraError::InitializationError(format!("Failed to query cameras: {}", e))
        })?;

        Ok(cameras
            .into_iter()
            .enumerate()
            .map(|(position, info)| {
                let index = match info.index() {
                    CameraIndex::Index(i) => *i,
                    CameraIndex::String(_) => position as u32,
                };
                DeviceIdentity::new(index, info.human_name())
            })
            .collect())
    }
}

/// Tries to open each index in turn and reports the ones that open, under a
/// generic name. Used when the native listing is unavailable.
pub struct IndexProbeProvider {
    backend: Arc<dyn CaptureBackend>,
    max_index: u32,
}

impl IndexProbeProvider {
    pub fn new(backend: Arc<dyn CaptureBackend>, max_index: u32) -> Self {
        Self { backend, max_index }
    }

    pub fn generic_name(index: u32) -> String {
        format!("USB Camera Device {}", index)
    }
}

impl DeviceProvider for IndexProbeProvider {
    fn name(&self) -> &'static str {
        "index-probe"
    }

    fn enumerate(&self) -> Result<Vec<DeviceIdentity>, CameraError> {
        let mut devices = Vec::new();
        for index in 0..self.max_index {
            match self.backend.open(index) {
                Ok(mut handle) => {
                    handle.release();
                    devices.push(DeviceIdentity::new(index, Self::generic_name(index)));
                }
                Err(e) => log::trace!("Index {} did not open: {}", index, e),
            }
        }
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBackend, MockDevice};

    #[test]
    fn test_index_probe_reports_openable_indices() {
        let backend = MockBackend::new(vec![
            MockDevice::new(0, "Front"),
            MockDevice::new(3, "Rear"),
            MockDevice::new(5, "Busy").always_busy(),
        ]);
        let provider = IndexProbeProvider::new(Arc::new(backend.clone()), 10);

        let devices = provider.enumerate().unwrap();
        assert_eq!(
            devices,
            vec![
                DeviceIdentity::new(0, "USB Camera Device 0"),
                DeviceIdentity::new(3, "USB Camera Device 3"),
            ]
        );
        assert_eq!(backend.open_handles(), 0, "probe-by-index must release what it opens");
    }

    #[test]
    fn test_index_probe_respects_range() {
        let backend = MockBackend::new(vec![MockDevice::new(12, "Far")]);
        let provider = IndexProbeProvider::new(Arc::new(backend), 10);
        assert!(provider.enumerate().unwrap().is_empty());
    }
}

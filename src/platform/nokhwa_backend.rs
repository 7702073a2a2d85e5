use super::{CaptureBackend, CaptureHandle};
use crate::errors::CameraError;
use crate::types::{FormatTag, PixelLayout, RawFrame};
use nokhwa::{
    pixel_format::RgbFormat,
    utils::{CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution},
    Camera,
};

/// Opens devices through nokhwa's native backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct NokhwaBackend;

impl NokhwaBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureBackend for NokhwaBackend {
    fn open(&self, index: u32) -> Result<Box<dyn CaptureHandle>, CameraError> {
        // No format preference: whatever the driver picks is the "default" mode.
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::None);

        let camera = Camera::new(CameraIndex::Index(index), requested).map_err(|e| {
            CameraError::DeviceBusy(format!("Failed to open camera {}: {}", index, e))
        })?;

        log::debug!("Opened camera {} via nokhwa", index);
        Ok(Box::new(NokhwaHandle {
            camera: Some(camera),
            index,
        }))
    }
}

/// nokhwa camera wrapper
pub struct NokhwaHandle {
    camera: Option<Camera>,
    index: u32,
}

impl NokhwaHandle {
    fn camera_mut(&mut self) -> Result<&mut Camera, CameraError> {
        self.camera
            .as_mut()
            .ok_or_else(|| CameraError::StreamError(format!("Camera {} released", self.index)))
    }
}

fn frame_format(tag: FormatTag) -> Option<FrameFormat> {
    match tag {
        FormatTag::Default => None,
        FormatTag::Mjpg => Some(FrameFormat::MJPEG),
        FormatTag::Yuy2 => Some(FrameFormat::YUYV),
    }
}

impl CaptureHandle for NokhwaHandle {
    fn configure(&mut self, format: FormatTag, width: u32, height: u32) -> Result<(), CameraError> {
        let index = self.index;
        let camera = self.camera_mut()?;

        // Most backends refuse format changes on a running stream.
        if camera.is_stream_open() {
            camera.stop_stream().map_err(|e| {
                CameraError::ConfigureError(format!("Failed to stop stream on {}: {}", index, e))
            })?;
        }

        if let Some(fourcc) = frame_format(format) {
            camera.set_frame_format(fourcc).map_err(|e| {
                CameraError::ConfigureError(format!("Camera {} rejected {}: {}", index, format, e))
            })?;
        }

        camera
            .set_resolution(Resolution::new(width, height))
            .map_err(|e| {
                CameraError::ConfigureError(format!(
                    "Camera {} rejected {}x{}: {}",
                    index, width, height, e
                ))
            })
    }

    fn resolution(&self) -> Result<(u32, u32), CameraError> {
        let camera = self
            .camera
            .as_ref()
            .ok_or_else(|| CameraError::StreamError(format!("Camera {} released", self.index)))?;
        let res = camera.resolution();
        Ok((res.width(), res.height()))
    }

    fn read_frame(&mut self) -> Result<RawFrame, CameraError> {
        let index = self.index;
        let camera = self.camera_mut()?;

        if !camera.is_stream_open() {
            camera.open_stream().map_err(|e| {
                CameraError::StreamError(format!("Failed to open stream on {}: {}", index, e))
            })?;
        }

        let frame = camera
            .frame()
            .map_err(|e| CameraError::CaptureError(format!("Failed to capture frame: {}", e)))?;

        let width = frame.resolution().width_x;
        let height = frame.resolution().height_y;
        let raw_bytes = frame.buffer_bytes();

        // nokhwa can hand back MJPEG even when RGB was requested
        let rgb = if raw_bytes.len() >= 3 && raw_bytes[..3] == [0xFF, 0xD8, 0xFF] {
            image::load_from_memory(&raw_bytes)
                .map_err(|e| CameraError::CaptureError(format!("Failed to decode MJPEG: {}", e)))?
                .to_rgb8()
                .into_raw()
        } else {
            frame
                .decode_image::<RgbFormat>()
                .map_err(|e| CameraError::CaptureError(format!("Failed to decode frame: {}", e)))?
                .into_raw()
        };

        Ok(RawFrame::new(width, height, PixelLayout::Rgb8, rgb))
    }

    fn release(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            if camera.is_stream_open() {
                if let Err(e) = camera.stop_stream() {
                    log::debug!("Stopping stream on camera {} failed: {}", self.index, e);
                }
            }
            log::debug!("Released camera {}", self.index);
        }
    }
}

impl Drop for NokhwaHandle {
    fn drop(&mut self) {
        self.release();
    }
}

//! Per-tick frame transform: convert, scale to fit, letterbox.

use crate::config::PipelineConfig;
use crate::session::CaptureSession;
use crate::types::{PixelLayout, RawFrame, SurfaceSize};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// What one tick produced for one channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// A surface-sized image ready to present.
    Composed(RgbImage),
    /// No frame this tick. Keep showing whatever was there.
    Missed,
    /// Surface too small to draw into; nothing was read.
    Skipped,
}

pub struct FramePipeline {
    min_surface_dim: u32,
    background: Rgb<u8>,
}

impl FramePipeline {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            min_surface_dim: config.min_surface_dim,
            background: Rgb(config.background),
        }
    }

    /// Surfaces at or below the minimum dimension have not been laid out yet.
    pub fn is_degenerate(&self, surface: SurfaceSize) -> bool {
        surface.width <= self.min_surface_dim || surface.height <= self.min_surface_dim
    }

    /// Read one frame from `session` and compose it for `surface`.
    ///
    /// Never changes session state. A read error, a malformed buffer or a
    /// panic while composing are all reported as [`TickOutcome::Missed`].
    pub fn tick(&self, session: &mut CaptureSession, surface: SurfaceSize) -> TickOutcome {
        if self.is_degenerate(surface) {
            return TickOutcome::Skipped;
        }

        let frame = match session.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::trace!("{} read miss: {}", session.channel(), e);
                return TickOutcome::Missed;
            }
        };

        match catch_unwind(AssertUnwindSafe(|| self.compose(frame, surface))) {
            Ok(Some(image)) => TickOutcome::Composed(image),
            Ok(None) => {
                log::trace!("{} dropped a malformed frame", session.channel());
                TickOutcome::Missed
            }
            Err(_) => {
                log::error!("{} frame conversion panicked", session.channel());
                TickOutcome::Missed
            }
        }
    }

    /// Convert and letterbox a raw frame. `None` if the buffer does not
    /// match its declared dimensions.
    pub fn compose(&self, frame: RawFrame, surface: SurfaceSize) -> Option<RgbImage> {
        let image = to_rgb(frame)?;
        Some(letterbox(&image, surface, self.background))
    }
}

/// Reorder a raw frame into an RGB image.
pub fn to_rgb(frame: RawFrame) -> Option<RgbImage> {
    if frame.width == 0 || frame.height == 0 || frame.data.len() != frame.expected_len() {
        return None;
    }

    let mut data = frame.data;
    if frame.layout == PixelLayout::Bgr8 {
        for pixel in data.chunks_exact_mut(3) {
            pixel.swap(0, 2);
        }
    }
    RgbImage::from_raw(frame.width, frame.height, data)
}

/// Largest size with the frame's aspect ratio that fits in `surface`.
///
/// Uses `min(sw/fw, sh/fh)` with the scaled side floored, so one side
/// always matches the surface exactly.
pub fn fit_within(frame_width: u32, frame_height: u32, surface: SurfaceSize) -> (u32, u32) {
    let (fw, fh) = (frame_width as u64, frame_height as u64);
    let (sw, sh) = (surface.width as u64, surface.height as u64);
    if fw == 0 || fh == 0 {
        return (0, 0);
    }

    let (w, h) = if sw * fh <= sh * fw {
        (sw, fh * sw / fw)
    } else {
        (fw * sh / fh, sh)
    };
    (w.max(1) as u32, h.max(1) as u32)
}

/// Scale `image` to fit `surface` and center it on a `background` canvas
/// of exactly the surface size.
pub fn letterbox(image: &RgbImage, surface: SurfaceSize, background: Rgb<u8>) -> RgbImage {
    let mut canvas = RgbImage::from_pixel(surface.width, surface.height, background);
    let (w, h) = fit_within(image.width(), image.height(), surface);
    if w == 0 || h == 0 || surface.width == 0 || surface.height == 0 {
        return canvas;
    }

    let x = (surface.width - w) / 2;
    let y = (surface.height - h) / 2;
    if (w, h) == image.dimensions() {
        imageops::overlay(&mut canvas, image, x as i64, y as i64);
    } else {
        let scaled = imageops::resize(image, w, h, FilterType::Triangle);
        imageops::overlay(&mut canvas, &scaled, x as i64, y as i64);
    }
    canvas
}

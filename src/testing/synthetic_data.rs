//! Synthetic frame data

use crate::types::{PixelLayout, RawFrame};

/// Gradient frame that changes with `frame_number`, in the given layout.
pub fn synthetic_video_frame(
    frame_number: u64,
    width: u32,
    height: u32,
    layout: PixelLayout,
) -> RawFrame {
    let mut data = vec![0u8; (width * height * 3) as usize];

    let base = (frame_number % 256) as u8;
    for y in 0..height {
        for x in 0..width {
            let idx = ((y * width + x) * 3) as usize;
            let (r, g, b) = (
                base.wrapping_add((x % 256) as u8),
                base.wrapping_add((y % 256) as u8),
                base.wrapping_add(((x + y) % 256) as u8),
            );
            let px = match layout {
                PixelLayout::Rgb8 => [r, g, b],
                PixelLayout::Bgr8 => [b, g, r],
            };
            data[idx..idx + 3].copy_from_slice(&px);
        }
    }

    RawFrame::new(width, height, layout, data)
}

/// Single-colour frame. `rgb` is given in RGB order regardless of `layout`.
pub fn solid_frame(width: u32, height: u32, rgb: [u8; 3], layout: PixelLayout) -> RawFrame {
    let px = match layout {
        PixelLayout::Rgb8 => rgb,
        PixelLayout::Bgr8 => [rgb[2], rgb[1], rgb[0]],
    };
    let data = px
        .iter()
        .copied()
        .cycle()
        .take((width * height * 3) as usize)
        .collect();
    RawFrame::new(width, height, layout, data)
}

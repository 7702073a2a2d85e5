//! Core value types shared by the catalog, probe, session and pipeline.

use crate::errors::CameraError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of independent capture channels.
pub const CHANNEL_COUNT: usize = 4;

/// Label used for the driver-default format tag in persisted mode strings.
pub const DEFAULT_FORMAT_LABEL: &str = "默认";

const DEFAULT_SUFFIX: &str = " (Auto)";

/// One attached capture device as reported by an enumeration pass.
///
/// The index is only meaningful within the pass that produced it; the
/// driver name is the stable key used for caching and re-binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub index: u32,
    pub driver_name: String,
}

impl DeviceIdentity {
    pub fn new(index: u32, driver_name: impl Into<String>) -> Self {
        Self {
            index,
            driver_name: driver_name.into(),
        }
    }

    /// `"{index}: {driverName}"`, as shown in device pickers.
    pub fn display_name(&self) -> String {
        format!("{}: {}", self.index, self.driver_name)
    }

    /// Cache key for this device.
    pub fn canonical_name(&self) -> &str {
        &self.driver_name
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.index, self.driver_name)
    }
}

/// Strip a leading `"{index}: "` from a display name.
pub fn canonical_from_display(display: &str) -> &str {
    match display.split_once(": ") {
        Some((prefix, rest)) if prefix.parse::<u32>().is_ok() => rest,
        _ => display,
    }
}

/// Pixel format requested from the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FormatTag {
    /// Whatever the driver negotiated on open; never sent to the device.
    Default,
    Mjpg,
    Yuy2,
}

impl FormatTag {
    pub fn label(&self) -> &'static str {
        match self {
            FormatTag::Default => DEFAULT_FORMAT_LABEL,
            FormatTag::Mjpg => "MJPG",
            FormatTag::Yuy2 => "YUY2",
        }
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for FormatTag {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            DEFAULT_FORMAT_LABEL => Ok(FormatTag::Default),
            "MJPG" => Ok(FormatTag::Mjpg),
            "YUY2" => Ok(FormatTag::Yuy2),
            other => Err(CameraError::InvalidMode(format!("unknown format tag: {other}"))),
        }
    }
}

impl Serialize for FormatTag {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for FormatTag {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A (format, width, height) capture mode.
///
/// The string form (`"MJPG 1280x720"`, `"默认 1920x1080 (Auto)"`) is the
/// persisted representation; `FromStr` accepts exactly what `Display` emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModeDescriptor {
    pub format: FormatTag,
    pub width: u32,
    pub height: u32,
}

impl ModeDescriptor {
    pub fn new(format: FormatTag, width: u32, height: u32) -> Result<Self, CameraError> {
        if width == 0 || height == 0 {
            return Err(CameraError::InvalidMode(format!(
                "dimensions must be positive, got {width}x{height}"
            )));
        }
        Ok(Self {
            format,
            width,
            height,
        })
    }

    /// Used when a channel has a device but nothing selectable.
    pub fn fallback() -> Self {
        Self {
            format: FormatTag::Default,
            width: 640,
            height: 480,
        }
    }

    pub fn is_default(&self) -> bool {
        self.format == FormatTag::Default
    }
}

impl fmt::Display for ModeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}x{}", self.format, self.width, self.height)?;
        if self.is_default() {
            f.write_str(DEFAULT_SUFFIX)?;
        }
        Ok(())
    }
}

impl FromStr for ModeDescriptor {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CameraError::InvalidMode(s.to_string());

        let (tag, rest) = s.split_once(' ').ok_or_else(invalid)?;
        let format: FormatTag = tag.parse()?;
        let dims = if format == FormatTag::Default {
            rest.strip_suffix(DEFAULT_SUFFIX).ok_or_else(invalid)?
        } else {
            rest
        };
        let (w, h) = dims.split_once('x').ok_or_else(invalid)?;
        let width: u32 = w.parse().map_err(|_| invalid())?;
        let height: u32 = h.parse().map_err(|_| invalid())?;
        let mode = ModeDescriptor::new(format, width, height)?;

        // "+720", "0720" and friends parse as numbers but would not survive
        // a format/parse cycle.
        if mode.to_string() != s {
            return Err(invalid());
        }
        Ok(mode)
    }
}

impl Serialize for ModeDescriptor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ModeDescriptor {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Index of one of the fixed channel slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(usize);

impl ChannelId {
    pub fn new(index: usize) -> Result<Self, CameraError> {
        if index < CHANNEL_COUNT {
            Ok(Self(index))
        } else {
            Err(CameraError::InvalidChannel(index))
        }
    }

    pub fn index(&self) -> usize {
        self.0
    }

    pub fn all() -> impl Iterator<Item = ChannelId> {
        (0..CHANNEL_COUNT).map(ChannelId)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Channel {}", self.0 + 1)
    }
}

/// Byte order of a raw frame's pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelLayout {
    Rgb8,
    Bgr8,
}

/// A frame as it comes off the device, before any conversion.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub data: Vec<u8>,
}

impl RawFrame {
    pub fn new(width: u32, height: u32, layout: PixelLayout, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            layout,
            data,
        }
    }

    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

/// Current pixel dimensions of a display surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

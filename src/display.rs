//! Display surface collaborator.

use crate::controller::ChannelStatus;
use crate::types::{ChannelId, SurfaceSize};
use image::RgbImage;

/// What a surface receives for one channel on one tick.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayUpdate {
    NoUpdate,
    Frame(RgbImage),
}

/// Whatever shows the channels: a window, a test recorder, the CLI's
/// snapshot writer.
pub trait DisplaySink {
    /// Current size of the channel's drawing area.
    fn surface_size(&self, channel: ChannelId) -> SurfaceSize;

    fn present(&mut self, channel: ChannelId, update: DisplayUpdate);

    fn set_status(&mut self, channel: ChannelId, status: &ChannelStatus);
}

/// Keeps the latest image and status per channel. Useful headless.
#[derive(Debug, Clone)]
pub struct RecordingSink {
    size: SurfaceSize,
    frames: Vec<Option<RgbImage>>,
    statuses: Vec<Option<ChannelStatus>>,
    presented: Vec<u64>,
}

impl RecordingSink {
    pub fn new(size: SurfaceSize) -> Self {
        let channels = crate::types::CHANNEL_COUNT;
        Self {
            size,
            frames: vec![None; channels],
            statuses: vec![None; channels],
            presented: vec![0; channels],
        }
    }

    pub fn resize(&mut self, size: SurfaceSize) {
        self.size = size;
    }

    pub fn last_frame(&self, channel: ChannelId) -> Option<&RgbImage> {
        self.frames[channel.index()].as_ref()
    }

    pub fn status(&self, channel: ChannelId) -> Option<&ChannelStatus> {
        self.statuses[channel.index()].as_ref()
    }

    /// Number of frames presented to `channel` so far.
    pub fn frames_presented(&self, channel: ChannelId) -> u64 {
        self.presented[channel.index()]
    }
}

impl DisplaySink for RecordingSink {
    fn surface_size(&self, _channel: ChannelId) -> SurfaceSize {
        self.size
    }

    fn present(&mut self, channel: ChannelId, update: DisplayUpdate) {
        if let DisplayUpdate::Frame(image) = update {
            self.frames[channel.index()] = Some(image);
            self.presented[channel.index()] += 1;
        }
    }

    fn set_status(&mut self, channel: ChannelId, status: &ChannelStatus) {
        self.statuses[channel.index()] = Some(status.clone());
    }
}

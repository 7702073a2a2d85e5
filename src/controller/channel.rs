use crate::types::{DeviceIdentity, ModeDescriptor};
use serde::Serialize;
use std::fmt;

/// Inline status shown next to a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ChannelStatus {
    WaitingForConfiguration,
    LoadedCached,
    Scanning,
    ScanComplete,
    /// The probe could not open the device or confirmed nothing.
    NoSignal,
    Disabled,
    Failed,
    /// Another channel already streams the same device.
    DeviceInUse,
    Standby,
    Streaming,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChannelStatus::WaitingForConfiguration => "Waiting for configuration",
            ChannelStatus::LoadedCached => "Loaded (cached)",
            ChannelStatus::Scanning => "Scanning hardware...",
            ChannelStatus::ScanComplete => "Scan complete",
            ChannelStatus::NoSignal => "Busy/No signal",
            ChannelStatus::Disabled => "Disabled",
            ChannelStatus::Failed => "Busy/Failed",
            ChannelStatus::DeviceInUse => "Busy/Failed (device already in use)",
            ChannelStatus::Standby => "Standby",
            ChannelStatus::Streaming => "Streaming",
        };
        f.write_str(label)
    }
}

/// Configuration of one channel as the control surface sees it.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelSlot {
    pub device: Option<DeviceIdentity>,
    /// Modes known for the device, preferred first. Empty while probing.
    pub available_modes: Vec<ModeDescriptor>,
    pub selected_mode: Option<ModeDescriptor>,
    pub enabled: bool,
    pub status: ChannelStatus,
}

impl Default for ChannelSlot {
    fn default() -> Self {
        Self {
            device: None,
            available_modes: Vec::new(),
            selected_mode: None,
            enabled: true,
            status: ChannelStatus::WaitingForConfiguration,
        }
    }
}

impl ChannelSlot {
    /// The mode a session would be started with.
    pub fn resolved_mode(&self) -> ModeDescriptor {
        self.selected_mode
            .or_else(|| self.available_modes.first().copied())
            .unwrap_or_else(ModeDescriptor::fallback)
    }

    /// Replace the mode list, keeping the current selection if it is still
    /// offered.
    pub(crate) fn offer_modes(&mut self, modes: Vec<ModeDescriptor>) {
        self.selected_mode = self
            .selected_mode
            .filter(|m| modes.contains(m))
            .or_else(|| modes.first().copied());
        self.available_modes = modes;
    }

    pub(crate) fn clear_device(&mut self) {
        self.device = None;
        self.available_modes.clear();
        self.selected_mode = None;
        self.status = self.idle_status();
    }

    /// Status to show while nothing is streaming.
    pub(crate) fn idle_status(&self) -> ChannelStatus {
        if !self.enabled {
            ChannelStatus::Disabled
        } else if self.device.is_none() {
            ChannelStatus::WaitingForConfiguration
        } else {
            ChannelStatus::Standby
        }
    }

    pub fn is_startable(&self) -> bool {
        self.enabled && self.device.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FormatTag;

    fn mode(format: FormatTag, w: u32, h: u32) -> ModeDescriptor {
        ModeDescriptor::new(format, w, h).unwrap()
    }

    #[test]
    fn test_resolved_mode_falls_back() {
        let mut slot = ChannelSlot::default();
        assert_eq!(slot.resolved_mode().to_string(), "默认 640x480 (Auto)");

        slot.offer_modes(vec![mode(FormatTag::Mjpg, 1280, 720)]);
        assert_eq!(slot.resolved_mode(), mode(FormatTag::Mjpg, 1280, 720));
    }

    #[test]
    fn test_offer_keeps_selection_when_still_offered() {
        let mut slot = ChannelSlot::default();
        let a = mode(FormatTag::Mjpg, 1920, 1080);
        let b = mode(FormatTag::Yuy2, 800, 600);

        slot.offer_modes(vec![a, b]);
        slot.selected_mode = Some(b);
        slot.offer_modes(vec![a, b]);
        assert_eq!(slot.selected_mode, Some(b));

        slot.offer_modes(vec![a]);
        assert_eq!(slot.selected_mode, Some(a));
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(ChannelStatus::Scanning.to_string(), "Scanning hardware...");
        assert_eq!(ChannelStatus::Failed.to_string(), "Busy/Failed");
        assert_eq!(ChannelStatus::NoSignal.to_string(), "Busy/No signal");
    }
}

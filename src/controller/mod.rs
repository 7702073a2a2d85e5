//! Owned system state for the four channels.
//!
//! `MultiCamController` is the only thing that mutates channel slots,
//! sessions or the capability cache. It lives on the control thread; probe
//! workers hand their results back through [`ProbeWorkers`] and nothing
//! else crosses threads.

pub mod channel;

pub use channel::{ChannelSlot, ChannelStatus};

use crate::cache::CapabilityCache;
use crate::catalog::DeviceCatalog;
use crate::config::MultiCamConfig;
use crate::display::{DisplaySink, DisplayUpdate};
use crate::errors::CameraError;
use crate::pipeline::{FramePipeline, TickOutcome};
use crate::platform::{default_providers, CaptureBackend, DeviceProvider, NokhwaBackend};
use crate::probe::{CapabilityProbe, ProbeOutcome, ProbeReport, ProbeWorkers};
use crate::session::{CaptureSession, SessionState};
use crate::types::{ChannelId, DeviceIdentity, ModeDescriptor, CHANNEL_COUNT};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Channels that came up and channels that did not, after a start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StartReport {
    pub active: Vec<ChannelId>,
    pub failed: Vec<ChannelId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    Started(StartReport),
    Stopped,
    /// Inside the cooldown window after the previous toggle.
    Ignored,
}

/// Per-tick tally across channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub composed: usize,
    pub missed: usize,
    pub skipped: usize,
    pub reports_applied: usize,
}

pub struct MultiCamController {
    config: MultiCamConfig,
    backend: Arc<dyn CaptureBackend>,
    catalog: DeviceCatalog,
    cache: CapabilityCache,
    probes: ProbeWorkers,
    pipeline: FramePipeline,
    slots: Vec<ChannelSlot>,
    sessions: Vec<Option<CaptureSession>>,
    running: bool,
    last_toggle: Option<Instant>,
}

impl MultiCamController {
    pub fn new(
        config: MultiCamConfig,
        backend: Arc<dyn CaptureBackend>,
        providers: Vec<Box<dyn DeviceProvider>>,
    ) -> Self {
        let catalog = DeviceCatalog::new(providers, &config.catalog);
        let cache = CapabilityCache::new(config.cache.path.clone());
        let probes = ProbeWorkers::new(CapabilityProbe::new(backend.clone(), config.probe.clone()));
        let pipeline = FramePipeline::new(&config.pipeline);

        Self {
            config,
            backend,
            catalog,
            cache,
            probes,
            pipeline,
            slots: (0..CHANNEL_COUNT).map(|_| ChannelSlot::default()).collect(),
            sessions: (0..CHANNEL_COUNT).map(|_| None).collect(),
            running: false,
            last_toggle: None,
        }
    }

    /// Controller over real hardware through nokhwa.
    pub fn with_native_backend(config: MultiCamConfig) -> Self {
        let backend: Arc<dyn CaptureBackend> = Arc::new(NokhwaBackend::new());
        let providers = default_providers(backend.clone(), config.catalog.fallback_max_index);
        Self::new(config, backend, providers)
    }

    /// Re-enumerate and re-bind every channel.
    ///
    /// Existing selections are resolved against the new list by display
    /// identity, then canonical name, and cleared if neither matches.
    /// Channels left empty pick the device at their own list position.
    pub fn refresh_devices(&mut self) -> Vec<DeviceIdentity> {
        let devices = self.catalog.enumerate();

        for channel in ChannelId::all() {
            let previous = self.slots[channel.index()].device.clone();
            let next = match previous {
                Some(previous) => {
                    let resolved = self.catalog.resolve(&previous);
                    if resolved.is_none() {
                        log::info!("{} lost {} after refresh", channel, previous);
                    }
                    resolved
                }
                None => devices.get(channel.index()).cloned(),
            };
            self.bind(channel, next);
        }

        devices
    }

    /// Bind `device` to `channel`, loading its modes from the cache or
    /// starting a background probe.
    pub fn select_device(
        &mut self,
        channel: ChannelId,
        device: Option<DeviceIdentity>,
    ) -> Result<(), CameraError> {
        if self.running {
            return Err(CameraError::AlreadyRunning);
        }
        self.bind(channel, device);
        Ok(())
    }

    fn bind(&mut self, channel: ChannelId, device: Option<DeviceIdentity>) {
        let Some(device) = device else {
            self.slots[channel.index()].clear_device();
            return;
        };

        let cached = self.cache.lookup(device.canonical_name());
        let slot = &mut self.slots[channel.index()];
        let same_name = slot
            .device
            .as_ref()
            .is_some_and(|d| d.canonical_name() == device.canonical_name());
        if !same_name {
            slot.selected_mode = None;
        }
        slot.device = Some(device.clone());

        match cached {
            Some(modes) => {
                log::debug!("{} using {} cached mode(s) for {}", channel, modes.len(), device);
                slot.offer_modes(modes);
                slot.status = if slot.enabled {
                    ChannelStatus::LoadedCached
                } else {
                    ChannelStatus::Disabled
                };
            }
            None => {
                slot.available_modes.clear();
                slot.selected_mode = None;
                slot.status = ChannelStatus::Scanning;
                if self.probes.spawn(device.clone()) {
                    log::info!("{} probing {}", channel, device);
                }
            }
        }
    }

    /// Pick one of the channel's available modes.
    pub fn select_mode(&mut self, channel: ChannelId, mode: ModeDescriptor) -> Result<(), CameraError> {
        let slot = &mut self.slots[channel.index()];
        if !slot.available_modes.contains(&mode) {
            return Err(CameraError::InvalidMode(format!(
                "{} is not offered on {}",
                mode, channel
            )));
        }
        slot.selected_mode = Some(mode);
        Ok(())
    }

    /// Takes effect on the next start.
    pub fn set_enabled(&mut self, channel: ChannelId, enabled: bool) {
        let streaming = self.sessions[channel.index()]
            .as_ref()
            .is_some_and(CaptureSession::is_streaming);
        let slot = &mut self.slots[channel.index()];
        slot.enabled = enabled;
        if !streaming && (!enabled || slot.status == ChannelStatus::Disabled) {
            slot.status = slot.idle_status();
        }
    }

    /// One pass over all channels: open every enabled channel that has a
    /// device.
    ///
    /// Channels that fail stay in [`SessionState::Failed`]. If none comes
    /// up, `NoActiveChannels` is returned and the controller stays stopped.
    pub fn start(&mut self) -> Result<StartReport, CameraError> {
        if self.running {
            return Err(CameraError::AlreadyRunning);
        }
        self.release_sessions();

        let mut report = StartReport::default();
        let mut in_use: Vec<DeviceIdentity> = Vec::new();

        for channel in ChannelId::all() {
            let slot = &mut self.slots[channel.index()];
            let Some(device) = slot.device.clone().filter(|_| slot.enabled) else {
                slot.status = slot.idle_status();
                continue;
            };

            if in_use.contains(&device) {
                log::warn!("{} skipped: {} already streams on another channel", channel, device);
                slot.status = ChannelStatus::DeviceInUse;
                report.failed.push(channel);
                continue;
            }

            let mode = slot.resolved_mode();
            let mut session = CaptureSession::new(channel);
            match session.start(self.backend.as_ref(), device.clone(), mode, &self.config.session) {
                Ok(()) => {
                    slot.status = ChannelStatus::Streaming;
                    in_use.push(device);
                    report.active.push(channel);
                }
                Err(e) => {
                    log::warn!("{} failed to start: {}", channel, e);
                    slot.status = ChannelStatus::Failed;
                    report.failed.push(channel);
                }
            }
            self.sessions[channel.index()] = Some(session);
        }

        if report.active.is_empty() {
            let requested = report.failed.len();
            log::error!("Start produced no active channels ({} requested)", requested);
            return Err(CameraError::NoActiveChannels(requested));
        }

        self.running = true;
        log::info!(
            "Started {} channel(s), {} failed",
            report.active.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Release every session. Safe to call when already stopped.
    pub fn stop(&mut self) {
        self.release_sessions();
        for slot in &mut self.slots {
            slot.status = slot.idle_status();
        }
        if self.running {
            log::info!("Stopped all channels");
        }
        self.running = false;
    }

    fn release_sessions(&mut self) {
        for session in self.sessions.iter_mut() {
            if let Some(mut session) = session.take() {
                session.stop();
            }
        }
    }

    /// Start when stopped, stop when running. Toggles inside the cooldown
    /// window after the previous one are ignored.
    pub fn toggle(&mut self) -> Result<ToggleOutcome, CameraError> {
        let now = Instant::now();
        if let Some(last) = self.last_toggle {
            if now.duration_since(last) < self.config.session.toggle_cooldown() {
                log::debug!("Toggle ignored during cooldown");
                return Ok(ToggleOutcome::Ignored);
            }
        }
        self.last_toggle = Some(now);

        if self.running {
            self.stop();
            Ok(ToggleOutcome::Stopped)
        } else {
            self.start().map(ToggleOutcome::Started)
        }
    }

    /// Stop everything, wipe the capability cache and enumerate again.
    /// Every device that is still selected gets probed from scratch.
    pub fn force_rescan(&mut self) -> Result<Vec<DeviceIdentity>, CameraError> {
        self.stop();
        let settle = self.config.session.rescan_settle();
        if !settle.is_zero() {
            std::thread::sleep(settle);
        }
        self.cache.clear()?;
        log::info!("Rescanning devices");
        Ok(self.refresh_devices())
    }

    /// Apply every probe report that has arrived. The only place probe
    /// results reach channel state or the cache.
    pub fn deliver_probe_reports(&mut self) -> usize {
        let reports = self.probes.try_deliver();
        let count = reports.len();
        for report in reports {
            self.apply_report(report);
        }
        count
    }

    /// Wait for all in-flight probes and apply their reports.
    pub async fn settle_probes(&mut self) -> usize {
        let mut count = self.deliver_probe_reports();
        while let Some(report) = self.probes.next_report().await {
            self.apply_report(report);
            count += 1;
        }
        count
    }

    fn apply_report(&mut self, report: ProbeReport) {
        if let Err(e) = report.persist(&self.cache) {
            log::warn!("Could not cache modes for {}: {}", report.device, e);
        }

        let name = report.device.canonical_name();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.device.as_ref().map(DeviceIdentity::canonical_name) != Some(name) {
                continue;
            }
            let streaming = self.sessions[index]
                .as_ref()
                .is_some_and(CaptureSession::is_streaming);

            let status = match &report.outcome {
                ProbeOutcome::Discovered(modes) => {
                    slot.offer_modes(modes.clone());
                    ChannelStatus::ScanComplete
                }
                ProbeOutcome::NoModes | ProbeOutcome::Busy => {
                    slot.available_modes.clear();
                    slot.selected_mode = None;
                    ChannelStatus::NoSignal
                }
            };
            if !streaming {
                slot.status = if slot.enabled { status } else { ChannelStatus::Disabled };
            }
        }
    }

    /// One scheduler tick: apply finished probes, then read, compose and
    /// present one frame per streaming channel in channel order.
    pub fn tick(&mut self, sink: &mut dyn DisplaySink) -> TickSummary {
        let mut summary = TickSummary {
            reports_applied: self.deliver_probe_reports(),
            ..TickSummary::default()
        };

        for channel in ChannelId::all() {
            sink.set_status(channel, &self.slots[channel.index()].status);

            let update = match self.sessions[channel.index()].as_mut() {
                Some(session) if session.is_streaming() => {
                    match self.pipeline.tick(session, sink.surface_size(channel)) {
                        TickOutcome::Composed(image) => {
                            summary.composed += 1;
                            DisplayUpdate::Frame(image)
                        }
                        TickOutcome::Missed => {
                            summary.missed += 1;
                            DisplayUpdate::NoUpdate
                        }
                        TickOutcome::Skipped => {
                            summary.skipped += 1;
                            DisplayUpdate::NoUpdate
                        }
                    }
                }
                _ => DisplayUpdate::NoUpdate,
            };
            sink.present(channel, update);
        }

        summary
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn channel(&self, channel: ChannelId) -> &ChannelSlot {
        &self.slots[channel.index()]
    }

    pub fn channels(&self) -> &[ChannelSlot] {
        &self.slots
    }

    pub fn session_state(&self, channel: ChannelId) -> Option<SessionState> {
        self.sessions[channel.index()].as_ref().map(CaptureSession::state)
    }

    pub fn devices(&self) -> &[DeviceIdentity] {
        self.catalog.devices()
    }

    pub fn pending_probes(&self) -> usize {
        self.probes.pending()
    }

    pub fn cache(&self) -> &CapabilityCache {
        &self.cache
    }

    pub fn config(&self) -> &MultiCamConfig {
        &self.config
    }
}

impl Drop for MultiCamController {
    fn drop(&mut self) {
        self.release_sessions();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBackend, MockDevice};
    use crate::types::FormatTag;

    fn controller(backend: &MockBackend, dir: &tempfile::TempDir) -> MultiCamController {
        let mut config = MultiCamConfig::without_delays();
        config.cache.path = dir.path().join("cam_config.json");
        MultiCamController::new(
            config,
            Arc::new(backend.clone()),
            vec![Box::new(backend.provider())],
        )
    }

    fn ch(index: usize) -> ChannelId {
        ChannelId::new(index).unwrap()
    }

    /// Cache entries so selection never spawns a probe thread.
    fn seed(controller: &MultiCamController, names: &[&str]) {
        for name in names {
            controller
                .cache()
                .save(name, &[ModeDescriptor::fallback()])
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_refresh_auto_selects_by_position() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::new(vec![MockDevice::new(0, "Front"), MockDevice::new(1, "Rear")]);
        let mut controller = controller(&backend, &dir);

        controller.refresh_devices();
        assert_eq!(controller.channel(ch(0)).status, ChannelStatus::Scanning);
        assert_eq!(
            controller.channel(ch(1)).device,
            Some(DeviceIdentity::new(1, "Rear"))
        );
        assert_eq!(controller.channel(ch(2)).device, None);
        assert_eq!(
            controller.channel(ch(2)).status,
            ChannelStatus::WaitingForConfiguration
        );

        assert_eq!(controller.settle_probes().await, 2);
        assert_eq!(controller.channel(ch(0)).status, ChannelStatus::ScanComplete);
        assert_eq!(
            controller.channel(ch(0)).available_modes[0].to_string(),
            "默认 640x480 (Auto)"
        );
    }

    #[tokio::test]
    async fn test_cached_device_skips_probe() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::new(vec![MockDevice::new(0, "Front")]);
        let mut controller = controller(&backend, &dir);
        let cached = vec![ModeDescriptor::new(FormatTag::Mjpg, 1280, 720).unwrap()];
        controller.cache().save("Front", &cached).unwrap();

        controller.refresh_devices();
        assert_eq!(controller.pending_probes(), 0);
        assert_eq!(controller.channel(ch(0)).status, ChannelStatus::LoadedCached);
        assert_eq!(controller.channel(ch(0)).selected_mode, Some(cached[0]));
        assert_eq!(backend.total_open_attempts(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_device_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::new(vec![MockDevice::new(0, "Front")]);
        let mut controller = controller(&backend, &dir);
        controller.refresh_devices();
        controller.settle_probes().await;

        let front = DeviceIdentity::new(0, "Front");
        controller.select_device(ch(1), Some(front)).unwrap();
        let report = controller.start().unwrap();

        assert_eq!(report.active, vec![ch(0)]);
        assert_eq!(report.failed, vec![ch(1)]);
        assert_eq!(controller.channel(ch(1)).status, ChannelStatus::DeviceInUse);
        assert_eq!(backend.open_handles(), 1);
    }

    #[tokio::test]
    async fn test_select_mode_must_be_offered() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::new(vec![
            MockDevice::new(0, "Front").honoring(&[(FormatTag::Mjpg, 1280, 720)])
        ]);
        let mut controller = controller(&backend, &dir);
        controller.refresh_devices();
        controller.settle_probes().await;

        let offered = ModeDescriptor::new(FormatTag::Mjpg, 1280, 720).unwrap();
        let missing = ModeDescriptor::new(FormatTag::Yuy2, 1920, 1080).unwrap();
        controller.select_mode(ch(0), offered).unwrap();
        assert!(matches!(
            controller.select_mode(ch(0), missing),
            Err(CameraError::InvalidMode(_))
        ));
        assert_eq!(controller.channel(ch(0)).selected_mode, Some(offered));
    }

    #[test]
    fn test_disabled_channel_is_not_started() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::new(vec![MockDevice::new(0, "Front"), MockDevice::new(1, "Rear")]);
        let mut controller = controller(&backend, &dir);
        seed(&controller, &["Front", "Rear"]);
        controller.select_device(ch(0), Some(DeviceIdentity::new(0, "Front"))).unwrap();
        controller.select_device(ch(1), Some(DeviceIdentity::new(1, "Rear"))).unwrap();
        controller.set_enabled(ch(1), false);
        assert_eq!(controller.channel(ch(1)).status, ChannelStatus::Disabled);

        let report = controller.start().unwrap();
        assert_eq!(report.active, vec![ch(0)]);
        assert!(report.failed.is_empty());
        assert_eq!(controller.session_state(ch(1)), None);
        assert_eq!(backend.open_attempts(1).len(), 0);
    }

    #[test]
    fn test_toggle_and_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::new(vec![MockDevice::new(0, "Front")]);
        let mut controller = controller(&backend, &dir);
        seed(&controller, &["Front"]);
        controller.select_device(ch(0), Some(DeviceIdentity::new(0, "Front"))).unwrap();

        assert!(matches!(controller.toggle(), Ok(ToggleOutcome::Started(_))));
        assert!(controller.is_running());
        assert_eq!(controller.toggle(), Ok(ToggleOutcome::Stopped));
        assert!(!controller.is_running());
        assert_eq!(backend.open_handles(), 0);

        controller.config.session.toggle_cooldown_ms = 60_000;
        controller.last_toggle = None;
        assert!(matches!(controller.toggle(), Ok(ToggleOutcome::Started(_))));
        assert_eq!(controller.toggle(), Ok(ToggleOutcome::Ignored));
        assert!(controller.is_running());
    }

    #[test]
    fn test_select_device_while_running_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::new(vec![MockDevice::new(0, "Front")]);
        let mut controller = controller(&backend, &dir);
        seed(&controller, &["Front"]);
        controller.select_device(ch(0), Some(DeviceIdentity::new(0, "Front"))).unwrap();
        controller.start().unwrap();

        assert_eq!(
            controller.select_device(ch(1), None),
            Err(CameraError::AlreadyRunning)
        );
        assert_eq!(controller.start(), Err(CameraError::AlreadyRunning));
        controller.stop();
        controller.stop();
        assert_eq!(controller.channel(ch(0)).status, ChannelStatus::Standby);
    }
}

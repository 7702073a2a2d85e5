//! End-to-end controller behaviour against the in-memory backend.

use multicam::testing::{MockBackend, MockDevice, ReadStep};
use multicam::{
    CameraError, ChannelId, ChannelStatus, DeviceIdentity, FormatTag, ModeDescriptor,
    MultiCamConfig, MultiCamController, RecordingSink, SessionState, SurfaceSize,
};
use std::sync::Arc;
use tempfile::TempDir;

fn setup(devices: Vec<MockDevice>) -> (MockBackend, MultiCamController, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let backend = MockBackend::new(devices);
    let mut config = MultiCamConfig::without_delays();
    config.cache.path = dir.path().join("cam_config.json");
    let controller = MultiCamController::new(
        config,
        Arc::new(backend.clone()),
        vec![Box::new(backend.provider())],
    );
    (backend, controller, dir)
}

fn ch(index: usize) -> ChannelId {
    ChannelId::new(index).unwrap()
}

fn mode(format: FormatTag, w: u32, h: u32) -> ModeDescriptor {
    ModeDescriptor::new(format, w, h).unwrap()
}

#[test]
fn test_all_channels_unopenable_is_aggregate_failure() {
    let (backend, mut controller, _dir) = setup(
        (0..4)
            .map(|i| MockDevice::new(i, format!("Cam {i}")).always_busy())
            .collect(),
    );
    for i in 0..4 {
        controller
            .cache()
            .save(&format!("Cam {i}"), &[ModeDescriptor::fallback()])
            .unwrap();
    }
    controller.refresh_devices();

    let result = controller.start();

    assert_eq!(result, Err(CameraError::NoActiveChannels(4)));
    assert!(!controller.is_running());
    for channel in ChannelId::all() {
        assert_eq!(controller.session_state(channel), Some(SessionState::Failed));
        assert_eq!(controller.channel(channel).status, ChannelStatus::Failed);
        assert_eq!(backend.open_attempts(channel.index() as u32).len(), 3);
    }
    assert_eq!(backend.open_handles(), 0);

    // Failed sessions are cleared by stop like any other.
    controller.stop();
    assert_eq!(controller.session_state(ch(0)), None);
}

#[test]
fn test_partial_start_is_not_escalated() {
    let (_backend, mut controller, _dir) = setup(vec![
        MockDevice::new(0, "Front"),
        MockDevice::new(1, "Rear").always_busy(),
    ]);
    for name in ["Front", "Rear"] {
        controller
            .cache()
            .save(name, &[ModeDescriptor::fallback()])
            .unwrap();
    }
    controller.refresh_devices();

    let report = controller.start().unwrap();
    assert_eq!(report.active, vec![ch(0)]);
    assert_eq!(report.failed, vec![ch(1)]);
    assert_eq!(controller.session_state(ch(0)), Some(SessionState::Streaming));
    assert_eq!(controller.session_state(ch(1)), Some(SessionState::Failed));
    assert_eq!(controller.channel(ch(1)).status.to_string(), "Busy/Failed");
}

#[tokio::test]
async fn test_force_rescan_reprobes_instead_of_hitting_cache() {
    let (backend, mut controller, _dir) = setup(vec![MockDevice::new(0, "Front")
        .honoring(&[(FormatTag::Mjpg, 1280, 720)])]);

    controller.refresh_devices();
    controller.settle_probes().await;
    assert!(controller.cache().lookup("Front").is_some());

    // A plain refresh is served from the cache.
    backend.clear_open_attempts();
    controller.refresh_devices();
    assert_eq!(controller.channel(ch(0)).status, ChannelStatus::LoadedCached);
    assert_eq!(controller.pending_probes(), 0);

    controller.force_rescan().unwrap();
    assert!(!controller.cache().path().exists());
    assert_eq!(controller.channel(ch(0)).status, ChannelStatus::Scanning);

    assert_eq!(controller.settle_probes().await, 1);
    assert!(backend.total_open_attempts() > 0);
    assert_eq!(controller.channel(ch(0)).status, ChannelStatus::ScanComplete);
    assert_eq!(
        controller.cache().lookup("Front"),
        Some(vec![
            mode(FormatTag::Default, 640, 480),
            mode(FormatTag::Mjpg, 1280, 720),
        ])
    );
}

#[test]
fn test_cache_hit_ignores_enumeration_index() {
    let (_backend, mut controller, _dir) = setup(vec![
        MockDevice::new(0, "Other"),
        MockDevice::new(3, "Front"),
    ]);
    let cached = vec![mode(FormatTag::Yuy2, 800, 600)];
    controller.cache().save("Front", &cached).unwrap();
    controller
        .cache()
        .save("Other", &[ModeDescriptor::fallback()])
        .unwrap();
    controller.refresh_devices();

    controller
        .select_device(ch(2), Some(DeviceIdentity::new(3, "Front")))
        .unwrap();
    assert_eq!(controller.channel(ch(2)).status, ChannelStatus::LoadedCached);
    assert_eq!(controller.channel(ch(2)).available_modes, cached);
}

#[test]
fn test_rescan_follows_device_name_across_index_shuffle() {
    let (backend, mut controller, _dir) = setup(vec![
        MockDevice::new(0, "Front"),
        MockDevice::new(1, "Rear"),
    ]);
    for name in ["Front", "Rear"] {
        controller
            .cache()
            .save(name, &[ModeDescriptor::fallback()])
            .unwrap();
    }
    controller.refresh_devices();
    assert_eq!(
        controller.channel(ch(1)).device,
        Some(DeviceIdentity::new(1, "Rear"))
    );

    backend.replace_devices(vec![MockDevice::new(0, "Rear"), MockDevice::new(1, "Front")]);
    controller.refresh_devices();

    assert_eq!(
        controller.channel(ch(0)).device,
        Some(DeviceIdentity::new(1, "Front"))
    );
    assert_eq!(
        controller.channel(ch(1)).device,
        Some(DeviceIdentity::new(0, "Rear"))
    );

    // Unplugging clears the selection instead of binding the next device.
    backend.replace_devices(vec![MockDevice::new(0, "Rear")]);
    controller.refresh_devices();
    assert_eq!(controller.channel(ch(0)).device, None);
    assert_eq!(
        controller.channel(ch(0)).status,
        ChannelStatus::WaitingForConfiguration
    );
}

#[test]
fn test_transient_miss_keeps_previous_image() {
    let (backend, mut controller, _dir) = setup(vec![
        MockDevice::new(0, "Front").with_default_resolution(64, 36)
    ]);
    controller
        .cache()
        .save("Front", &[ModeDescriptor::fallback()])
        .unwrap();
    controller.refresh_devices();
    controller.start().unwrap();

    let mut sink = RecordingSink::new(SurfaceSize::new(160, 90));
    let summary = controller.tick(&mut sink);
    assert_eq!(summary.composed, 1);
    let shown = sink.last_frame(ch(0)).cloned().unwrap();
    assert_eq!(shown.dimensions(), (160, 90));

    backend.script_reads(0, &[ReadStep::Miss]);
    let summary = controller.tick(&mut sink);

    assert_eq!(summary.missed, 1);
    assert_eq!(sink.last_frame(ch(0)), Some(&shown));
    assert_eq!(sink.frames_presented(ch(0)), 1);
    assert_eq!(controller.session_state(ch(0)), Some(SessionState::Streaming));
    assert_eq!(sink.status(ch(0)), Some(&ChannelStatus::Streaming));

    assert_eq!(controller.tick(&mut sink).composed, 1);
}

#[test]
fn test_degenerate_surface_skips_tick() {
    let (_backend, mut controller, _dir) = setup(vec![MockDevice::new(0, "Front")]);
    controller
        .cache()
        .save("Front", &[ModeDescriptor::fallback()])
        .unwrap();
    controller.refresh_devices();
    controller.start().unwrap();

    let mut sink = RecordingSink::new(SurfaceSize::new(1, 1));
    let summary = controller.tick(&mut sink);
    assert_eq!(summary.skipped, 1);
    assert!(sink.last_frame(ch(0)).is_none());

    sink.resize(SurfaceSize::new(320, 240));
    assert_eq!(controller.tick(&mut sink).composed, 1);
}

#[tokio::test]
async fn test_one_probe_serves_every_channel_on_that_device() {
    let (backend, mut controller, _dir) = setup(vec![MockDevice::new(0, "Front")
        .honoring(&[(FormatTag::Yuy2, 800, 600)])]);

    let front = DeviceIdentity::new(0, "Front");
    controller.select_device(ch(0), Some(front.clone())).unwrap();
    controller.select_device(ch(3), Some(front)).unwrap();
    assert_eq!(controller.pending_probes(), 1);

    assert_eq!(controller.settle_probes().await, 1);
    for channel in [ch(0), ch(3)] {
        assert_eq!(controller.channel(channel).status, ChannelStatus::ScanComplete);
        assert_eq!(
            controller.channel(channel).selected_mode,
            Some(mode(FormatTag::Default, 640, 480))
        );
    }
    assert_eq!(backend.open_handles(), 0);
}

#[tokio::test]
async fn test_late_report_is_cached_but_not_applied() {
    let (_backend, mut controller, _dir) = setup(vec![MockDevice::new(0, "Front")]);

    controller
        .select_device(ch(0), Some(DeviceIdentity::new(0, "Front")))
        .unwrap();
    controller.select_device(ch(0), None).unwrap();
    controller.settle_probes().await;

    assert!(controller.cache().lookup("Front").is_some());
    assert_eq!(controller.channel(ch(0)).device, None);
    assert!(controller.channel(ch(0)).available_modes.is_empty());
}

#[tokio::test]
async fn test_busy_probe_is_reported_and_not_cached() {
    let (_backend, mut controller, _dir) =
        setup(vec![MockDevice::new(0, "Front").always_busy()]);

    controller.refresh_devices();
    controller.settle_probes().await;

    assert_eq!(controller.channel(ch(0)).status, ChannelStatus::NoSignal);
    assert!(controller.cache().lookup("Front").is_none());

    // Nothing confirmed, so the channel would start in the driver default.
    assert_eq!(
        controller.channel(ch(0)).resolved_mode(),
        ModeDescriptor::fallback()
    );
}

#[tokio::test]
async fn test_probe_reports_arrive_through_tick() {
    let (_backend, mut controller, _dir) = setup(vec![MockDevice::new(0, "Front")]);
    controller.refresh_devices();

    let mut sink = RecordingSink::new(SurfaceSize::new(64, 64));
    let mut applied = 0;
    for _ in 0..200 {
        applied += controller.tick(&mut sink).reports_applied;
        if applied > 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    // Reports are applied before statuses go out, so the same tick shows
    // the result.
    assert_eq!(applied, 1);
    assert_eq!(sink.status(ch(0)), Some(&ChannelStatus::ScanComplete));
}

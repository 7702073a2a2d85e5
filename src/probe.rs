//! Empirical capability probing.
//!
//! Drivers routinely accept a mode request and then quietly keep running
//! at some other resolution, so advertised format lists are not trusted.
//! The probe opens the device, asks for each candidate mode, lets the
//! request settle with one discarded read, and keeps the mode only if the
//! driver then reports exactly the requested width and height.
//!
//! The pixel format itself is not read back: a driver that ignores the
//! format but honors the resolution is recorded under the requested format.

use crate::cache::CapabilityCache;
use crate::config::ProbeConfig;
use crate::errors::CameraError;
use crate::platform::{CaptureBackend, CaptureHandle};
use crate::types::{DeviceIdentity, FormatTag, ModeDescriptor};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Result of testing one candidate mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TripleVerdict {
    Accepted,
    /// Driver reported a different resolution after the request.
    Rejected { reported: (u32, u32) },
    /// Configure or read-back errored.
    Failed(CameraError),
}

/// Result of probing one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "modes", rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// Modes in discovery order; the driver default (if any) comes first.
    Discovered(Vec<ModeDescriptor>),
    /// The device opened but nothing could be confirmed.
    NoModes,
    /// The device never opened.
    Busy,
}

impl ProbeOutcome {
    pub fn modes(&self) -> &[ModeDescriptor] {
        match self {
            ProbeOutcome::Discovered(modes) => modes,
            ProbeOutcome::NoModes | ProbeOutcome::Busy => &[],
        }
    }
}

/// Immutable result handed from a probe worker to the control thread.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub device: DeviceIdentity,
    pub outcome: ProbeOutcome,
    pub probed_at: DateTime<Utc>,
}

impl ProbeReport {
    /// Write discovered modes to the cache. Empty results are never cached
    /// so a later attempt is not blocked by a stale empty entry.
    pub fn persist(&self, cache: &CapabilityCache) -> Result<(), CameraError> {
        match &self.outcome {
            ProbeOutcome::Discovered(modes) => cache.save(self.device.canonical_name(), modes),
            ProbeOutcome::NoModes | ProbeOutcome::Busy => Ok(()),
        }
    }
}

pub struct CapabilityProbe {
    backend: Arc<dyn CaptureBackend>,
    config: ProbeConfig,
}

impl CapabilityProbe {
    pub fn new(backend: Arc<dyn CaptureBackend>, config: ProbeConfig) -> Self {
        Self { backend, config }
    }

    /// Probe one device. Blocks for the settle delays and all hardware I/O;
    /// run it off the control thread.
    pub fn run(&self, device: &DeviceIdentity) -> ProbeOutcome {
        let Some(mut handle) = self.open_with_retry(device) else {
            log::warn!(
                "Probe of {} gave up after {} attempt(s): device busy",
                device,
                self.config.open_attempts
            );
            return ProbeOutcome::Busy;
        };

        let mut found: Vec<ModeDescriptor> = Vec::new();

        match handle.resolution() {
            Ok((w, h)) => match ModeDescriptor::new(FormatTag::Default, w, h) {
                Ok(mode) => found.push(mode),
                Err(_) => log::debug!("{} reports no usable default ({}x{})", device, w, h),
            },
            Err(e) => log::debug!("{} default resolution unreadable: {}", device, e),
        }

        for mode in self.config.candidate_modes() {
            match Self::probe_triple(handle.as_mut(), mode) {
                TripleVerdict::Accepted => {
                    log::debug!("{}: {} confirmed", device, mode);
                    if !found.contains(&mode) {
                        found.push(mode);
                    }
                }
                TripleVerdict::Rejected { reported } => log::debug!(
                    "{}: {} rejected, driver reports {}x{}",
                    device,
                    mode,
                    reported.0,
                    reported.1
                ),
                TripleVerdict::Failed(e) => log::debug!("{}: {} failed: {}", device, mode, e),
            }
        }

        handle.release();

        if found.is_empty() {
            log::warn!("Probe of {} confirmed no modes", device);
            ProbeOutcome::NoModes
        } else {
            log::info!("Probe of {} confirmed {} mode(s)", device, found.len());
            ProbeOutcome::Discovered(found)
        }
    }

    fn open_with_retry(&self, device: &DeviceIdentity) -> Option<Box<dyn CaptureHandle>> {
        let attempts = self.config.open_attempts;
        for attempt in 1..=attempts {
            // Give the driver time to let go of a previous session first.
            std::thread::sleep(self.config.settle_delay());
            match self.backend.open(device.index) {
                Ok(handle) => return Some(handle),
                Err(e) => log::debug!(
                    "Probe open of {} failed (attempt {}/{}): {}",
                    device,
                    attempt,
                    attempts,
                    e
                ),
            }
        }
        None
    }

    /// Request `mode`, discard one frame, and compare what the driver reports.
    pub fn probe_triple(handle: &mut dyn CaptureHandle, mode: ModeDescriptor) -> TripleVerdict {
        if let Err(e) = handle.configure(mode.format, mode.width, mode.height) {
            return TripleVerdict::Failed(e);
        }

        if let Err(e) = handle.read_frame() {
            log::trace!("Settle read after requesting {} missed: {}", mode, e);
        }

        match handle.resolution() {
            Ok(reported) if reported == (mode.width, mode.height) => TripleVerdict::Accepted,
            Ok(reported) => TripleVerdict::Rejected { reported },
            Err(e) => TripleVerdict::Failed(e),
        }
    }
}

/// Background probe workers and their single delivery point.
///
/// At most one probe per canonical device name runs at a time. Workers only
/// produce [`ProbeReport`]s; whoever owns this value applies them.
pub struct ProbeWorkers {
    probe: Arc<CapabilityProbe>,
    tx: mpsc::UnboundedSender<ProbeReport>,
    rx: mpsc::UnboundedReceiver<ProbeReport>,
    in_flight: HashSet<String>,
}

impl ProbeWorkers {
    pub fn new(probe: CapabilityProbe) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            probe: Arc::new(probe),
            tx,
            rx,
            in_flight: HashSet::new(),
        }
    }

    /// Start probing `device` in the background. Returns false if a probe
    /// for the same canonical name is already running.
    pub fn spawn(&mut self, device: DeviceIdentity) -> bool {
        if !self.in_flight.insert(device.canonical_name().to_string()) {
            log::debug!("Probe for {:?} already running", device.canonical_name());
            return false;
        }

        let probe = self.probe.clone();
        let tx = self.tx.clone();
        let job = move || {
            let outcome = match catch_unwind(AssertUnwindSafe(|| probe.run(&device))) {
                Ok(outcome) => outcome,
                Err(_) => {
                    log::error!("Probe of {} panicked inside the capture backend", device);
                    ProbeOutcome::Busy
                }
            };
            let report = ProbeReport {
                device,
                outcome,
                probed_at: Utc::now(),
            };
            // Receiver gone means the controller was dropped; nothing to do.
            let _ = tx.send(report);
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => drop(runtime.spawn_blocking(job)),
            Err(_) => {
                if let Err(e) = std::thread::Builder::new()
                    .name("multicam-probe".to_string())
                    .spawn(job)
                {
                    log::error!("Failed to spawn probe worker: {}", e);
                }
            }
        }
        true
    }

    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_probing(&self, canonical_name: &str) -> bool {
        self.in_flight.contains(canonical_name)
    }

    /// Reports that have arrived since the last call, without blocking.
    pub fn try_deliver(&mut self) -> Vec<ProbeReport> {
        let mut reports = Vec::new();
        while let Ok(report) = self.rx.try_recv() {
            self.in_flight.remove(report.device.canonical_name());
            reports.push(report);
        }
        reports
    }

    /// Wait for the next report, or `None` when nothing is in flight.
    pub async fn next_report(&mut self) -> Option<ProbeReport> {
        if self.in_flight.is_empty() {
            return None;
        }
        let report = self.rx.recv().await?;
        self.in_flight.remove(report.device.canonical_name());
        Some(report)
    }
}

//! Device enumeration with provider fallback.

use crate::config::CatalogConfig;
use crate::platform::DeviceProvider;
use crate::types::DeviceIdentity;
use std::time::Duration;

/// The most recent list of attached devices.
///
/// Enumeration never fails: providers are tried in priority order and the
/// first one that returns a non-empty list wins. If none does, the catalog
/// is simply empty.
pub struct DeviceCatalog {
    providers: Vec<Box<dyn DeviceProvider>>,
    startup_delay: Duration,
    enumerate_pause: Duration,
    warmed_up: bool,
    devices: Vec<DeviceIdentity>,
}

impl DeviceCatalog {
    pub fn new(providers: Vec<Box<dyn DeviceProvider>>, config: &CatalogConfig) -> Self {
        Self {
            providers,
            startup_delay: config.startup_delay(),
            enumerate_pause: config.enumerate_pause(),
            warmed_up: false,
            devices: Vec::new(),
        }
    }

    /// Re-list attached devices, replacing the previous list.
    ///
    /// Blocks for the configured pause first (plus the startup delay on the
    /// first call) since drivers report partial lists right after startup
    /// or right after a handle was released.
    pub fn enumerate(&mut self) -> Vec<DeviceIdentity> {
        let mut pause = self.enumerate_pause;
        if !self.warmed_up {
            pause += self.startup_delay;
            self.warmed_up = true;
        }
        if !pause.is_zero() {
            std::thread::sleep(pause);
        }

        self.devices = self.query_providers();
        self.devices.clone()
    }

    fn query_providers(&self) -> Vec<DeviceIdentity> {
        for provider in &self.providers {
            match provider.enumerate() {
                Ok(devices) if !devices.is_empty() => {
                    log::info!(
                        "Enumerated {} device(s) via {}",
                        devices.len(),
                        provider.name()
                    );
                    return devices;
                }
                Ok(_) => log::debug!("Provider {} found no devices", provider.name()),
                Err(e) => log::warn!("Provider {} failed: {}", provider.name(), e),
            }
        }
        log::warn!("No capture devices found");
        Vec::new()
    }

    pub fn devices(&self) -> &[DeviceIdentity] {
        &self.devices
    }

    pub fn find_by_display(&self, display: &str) -> Option<&DeviceIdentity> {
        self.devices.iter().find(|d| d.display_name() == display)
    }

    pub fn find_by_canonical(&self, name: &str) -> Option<&DeviceIdentity> {
        self.devices.iter().find(|d| d.canonical_name() == name)
    }

    /// Re-bind a previously seen device to the current list: same display
    /// identity if still present, otherwise the first device with the same
    /// canonical name. An index alone is never trusted.
    pub fn resolve(&self, previous: &DeviceIdentity) -> Option<DeviceIdentity> {
        self.devices
            .iter()
            .find(|d| *d == previous)
            .or_else(|| self.find_by_canonical(previous.canonical_name()))
            .cloned()
    }
}

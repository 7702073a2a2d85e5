//! Persistent per-device capability cache.
//!
//! A single JSON document mapping canonical device names to the mode
//! strings discovered for them, first entry preferred:
//!
//! ```json
//! {
//!     "HD Pro Webcam C920": [
//!         "默认 640x480 (Auto)",
//!         "MJPG 1920x1080",
//!         "MJPG 1280x720"
//!     ]
//! }
//! ```
//!
//! Mode strings are parsed into [`ModeDescriptor`]s at this boundary and
//! nowhere else.

use crate::errors::CameraError;
use crate::types::ModeDescriptor;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub type CacheDocument = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone)]
pub struct CapabilityCache {
    path: PathBuf,
}

impl CapabilityCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole document. Missing or malformed files read as empty.
    pub fn load(&self) -> CacheDocument {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return CacheDocument::new(),
            Err(e) => {
                log::warn!("Capability cache {:?} unreadable, ignoring: {}", self.path, e);
                return CacheDocument::new();
            }
        };

        match serde_json::from_str(&contents) {
            Ok(document) => document,
            Err(e) => {
                log::warn!("Capability cache {:?} is malformed, ignoring: {}", self.path, e);
                CacheDocument::new()
            }
        }
    }

    /// Cached modes for a device, or `None` when there is nothing usable.
    /// Unparseable entries are dropped individually.
    pub fn lookup(&self, canonical_name: &str) -> Option<Vec<ModeDescriptor>> {
        let mut document = self.load();
        let entries = document.remove(canonical_name)?;

        let modes: Vec<ModeDescriptor> = entries
            .iter()
            .filter_map(|entry| match entry.parse() {
                Ok(mode) => Some(mode),
                Err(e) => {
                    log::warn!("Dropping cached mode for {:?}: {}", canonical_name, e);
                    None
                }
            })
            .collect();

        if modes.is_empty() {
            None
        } else {
            Some(modes)
        }
    }

    /// Replace one device's entry, keeping every other key as found on disk.
    pub fn save(&self, canonical_name: &str, modes: &[ModeDescriptor]) -> Result<(), CameraError> {
        let mut document = self.load();
        document.insert(
            canonical_name.to_string(),
            modes.iter().map(ToString::to_string).collect(),
        );
        self.write(&document)?;
        log::info!(
            "Cached {} mode(s) for {:?} in {:?}",
            modes.len(),
            canonical_name,
            self.path
        );
        Ok(())
    }

    /// Delete the whole store. A store that is already gone is not an error.
    pub fn clear(&self) -> Result<(), CameraError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                log::info!("Cleared capability cache {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CameraError::CacheError(format!(
                "Failed to remove {:?}: {}",
                self.path, e
            ))),
        }
    }

    fn write(&self, document: &CacheDocument) -> Result<(), CameraError> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        document
            .serialize(&mut serializer)
            .map_err(|e| CameraError::CacheError(format!("Failed to serialize cache: {}", e)))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                CameraError::CacheError(format!("Failed to create cache directory: {}", e))
            })?;
        }

        fs::write(&self.path, buf)
            .map_err(|e| CameraError::CacheError(format!("Failed to write {:?}: {}", self.path, e)))
    }
}

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use super::ordering;
use crate::audio::{AudioDevice, DeviceType, KnownDevice};
use crate::system::FileSystemInterface;

const KNOWN_DEVICES_FILE: &str = "known-devices.toml";
const STATE_FILE: &str = "state.toml";

#[derive(Debug, Default, Serialize, Deserialize)]
struct PriorityDocument {
    #[serde(default)]
    devices: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct KnownDevicesDocument {
    #[serde(default)]
    devices: Vec<KnownDevice>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StateDocument {
    #[serde(default = "default_auto_mode")]
    auto_mode: bool,
    #[serde(default)]
    known_devices_migrated: bool,
}

fn default_auto_mode() -> bool {
    true
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            auto_mode: default_auto_mode(),
            known_devices_migrated: false,
        }
    }
}

/// Outcome of reading one persisted document.
enum Loaded<T> {
    Missing,
    Parsed(T),
    Unreadable,
}

impl<T: Default> Loaded<T> {
    fn into_value(self) -> T {
        match self {
            Loaded::Parsed(value) => value,
            Loaded::Missing | Loaded::Unreadable => T::default(),
        }
    }
}

/// Persisted priority orders, known-device memory and mode flag.
///
/// Each key lives in its own TOML document under `state_dir`. Documents are
/// read on every access so changes made by another process (the CLI while
/// the daemon runs) are picked up, and written through the file system's
/// atomic replace.
pub struct PriorityStore<F: FileSystemInterface> {
    file_system: F,
    state_dir: PathBuf,
    warnings: Mutex<Vec<String>>,
}

impl<F: FileSystemInterface> PriorityStore<F> {
    /// Open the store, creating its directory and running the one-time
    /// known-device migration if it has not run yet.
    pub fn open(file_system: F, state_dir: PathBuf) -> Result<Self> {
        file_system.create_dir(&state_dir).with_context(|| {
            format!("Failed to create state directory: {}", state_dir.display())
        })?;

        let store = Self {
            file_system,
            state_dir,
            warnings: Mutex::new(Vec::new()),
        };
        store.migrate_known_devices()?;

        debug!("Priority store opened at {}", store.state_dir.display());
        Ok(store)
    }

    /// Default location of the store
    pub fn default_state_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home_dir.join(".local/share/audio-priority-sync"))
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn priority_order(&self, device_type: DeviceType) -> Vec<String> {
        self.read_document::<PriorityDocument>(&Self::priority_file(device_type))
            .into_value()
            .devices
    }

    /// Replace the priority order for a device type in a single write
    pub fn set_priority_order(&self, device_type: DeviceType, order: &[String]) -> Result<()> {
        let document = PriorityDocument {
            devices: ordering::dedupe(order),
        };
        self.write_document(&Self::priority_file(device_type), &document)?;
        info!(
            "Stored {} priority order: [{}]",
            device_type.as_str(),
            document.devices.join(", ")
        );
        Ok(())
    }

    pub fn sort_by_priority(
        &self,
        devices: &[AudioDevice],
        device_type: DeviceType,
    ) -> Vec<AudioDevice> {
        ordering::sort_by_priority(devices, &self.priority_order(device_type))
    }

    /// Upsert memory records for exactly the given devices, stamped now
    pub fn remember_devices(&self, devices: &[AudioDevice]) -> Result<()> {
        self.remember_devices_at(devices, Utc::now())
    }

    pub fn remember_devices_at(&self, devices: &[AudioDevice], seen_at: DateTime<Utc>) -> Result<()> {
        if devices.is_empty() {
            return Ok(());
        }

        let mut records = self
            .read_document::<KnownDevicesDocument>(KNOWN_DEVICES_FILE)
            .into_value()
            .devices;

        for device in devices {
            match records
                .iter_mut()
                .find(|record| record.matches(&device.uid, device.device_type))
            {
                Some(record) => {
                    record.name = device.name.clone();
                    // last_seen never moves backwards
                    if seen_at > record.last_seen {
                        record.last_seen = seen_at;
                    }
                }
                None => {
                    debug!("Remembering new device: {}", device);
                    records.push(KnownDevice {
                        uid: device.uid.clone(),
                        device_type: device.device_type,
                        name: device.name.clone(),
                        last_seen: seen_at,
                    });
                }
            }
        }

        self.write_document(KNOWN_DEVICES_FILE, &KnownDevicesDocument { devices: records })
    }

    /// Known devices in deterministic order
    pub fn known_devices(&self) -> Vec<KnownDevice> {
        let records = self
            .read_document::<KnownDevicesDocument>(KNOWN_DEVICES_FILE)
            .into_value()
            .devices;
        ordering::sort_known_devices(records)
    }

    /// Remove the memory record for a device. Returns whether one existed.
    pub fn forget(&self, uid: &str, device_type: DeviceType) -> Result<bool> {
        let mut records = match self.read_document::<KnownDevicesDocument>(KNOWN_DEVICES_FILE) {
            Loaded::Parsed(document) => document.devices,
            Loaded::Missing | Loaded::Unreadable => return Ok(false),
        };

        let before = records.len();
        records.retain(|record| !record.matches(uid, device_type));
        if records.len() == before {
            debug!("No {} device '{}' to forget", device_type.as_str(), uid);
            return Ok(false);
        }

        self.write_document(KNOWN_DEVICES_FILE, &KnownDevicesDocument { devices: records })?;
        info!("Forgot {} device '{}'", device_type.as_str(), uid);
        Ok(true)
    }

    pub fn auto_mode(&self) -> bool {
        self.read_document::<StateDocument>(STATE_FILE)
            .into_value()
            .auto_mode
    }

    pub fn set_auto_mode(&self, enabled: bool) -> Result<()> {
        let mut state = self.read_document::<StateDocument>(STATE_FILE).into_value();
        state.auto_mode = enabled;
        self.write_document(STATE_FILE, &state)?;
        info!(
            "Stored mode: {}",
            if enabled { "auto" } else { "manual" }
        );
        Ok(())
    }

    /// Drain the warnings collected while reading persisted data
    pub fn take_warnings(&self) -> Vec<String> {
        match self.warnings.lock() {
            Ok(mut warnings) => std::mem::take(&mut *warnings),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    fn migrate_known_devices(&self) -> Result<()> {
        let mut state = self.read_document::<StateDocument>(STATE_FILE).into_value();
        if state.known_devices_migrated {
            return Ok(());
        }

        match self.read_document::<KnownDevicesDocument>(KNOWN_DEVICES_FILE) {
            Loaded::Parsed(document) => {
                let (devices, removed) = ordering::dedupe_known_devices(document.devices);
                if removed > 0 {
                    info!("Removed {} duplicate known device records", removed);
                    self.write_document(KNOWN_DEVICES_FILE, &KnownDevicesDocument { devices })?;
                }
            }
            Loaded::Missing => {}
            Loaded::Unreadable => {
                // Leave the flag unset so the migration runs once the data is readable
                warn!("Skipping known device migration, stored data is unreadable");
                return Ok(());
            }
        }

        state.known_devices_migrated = true;
        self.write_document(STATE_FILE, &state)
    }

    fn priority_file(device_type: DeviceType) -> String {
        format!("priority-{}.toml", device_type.as_str())
    }

    fn path(&self, file_name: &str) -> PathBuf {
        self.state_dir.join(file_name)
    }

    fn record_warning(&self, message: String) {
        warn!("{}", message);
        match self.warnings.lock() {
            Ok(mut warnings) => warnings.push(message),
            Err(poisoned) => poisoned.into_inner().push(message),
        }
    }

    fn read_document<T: DeserializeOwned>(&self, file_name: &str) -> Loaded<T> {
        let path = self.path(file_name);
        if !self.file_system.file_exists(&path) {
            return Loaded::Missing;
        }

        let raw = match self.file_system.read_file(&path) {
            Ok(raw) => raw,
            Err(e) => {
                self.record_warning(format!("Could not read {}: {:#}", path.display(), e));
                return Loaded::Unreadable;
            }
        };

        match toml::from_str(&raw) {
            Ok(document) => Loaded::Parsed(document),
            Err(e) => {
                self.record_warning(format!(
                    "Ignoring unreadable data in {}: {}",
                    path.display(),
                    e
                ));
                Loaded::Unreadable
            }
        }
    }

    fn write_document<T: Serialize + DeserializeOwned>(&self, file_name: &str, document: &T) -> Result<()> {
        let path = self.path(file_name);
        self.preserve_unreadable::<T>(&path)?;

        let content = toml::to_string_pretty(document)
            .with_context(|| format!("Failed to serialize {}", file_name))?;
        self.file_system
            .write_file(&path, &content)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Copy unparseable content aside before it is replaced, so it stays
    /// available for diagnosis.
    fn preserve_unreadable<T: DeserializeOwned>(&self, path: &Path) -> Result<()> {
        if !self.file_system.file_exists(path) {
            return Ok(());
        }

        let raw = self.file_system.read_file(path).with_context(|| {
            format!(
                "Refusing to overwrite {} because its current content cannot be read",
                path.display()
            )
        })?;
        if toml::from_str::<T>(&raw).is_ok() {
            return Ok(());
        }

        let backup = self.backup_path(path);
        self.file_system
            .write_file(&backup, &raw)
            .with_context(|| format!("Failed to preserve {}", path.display()))?;
        warn!(
            "Preserved unreadable {} as {}",
            path.display(),
            backup.display()
        );
        Ok(())
    }

    fn backup_path(&self, path: &Path) -> PathBuf {
        let base = format!("{}.corrupt", path.display());
        let mut candidate = PathBuf::from(&base);
        let mut counter = 1;
        while self.file_system.file_exists(&candidate) {
            candidate = PathBuf::from(format!("{}.{}", base, counter));
            counter += 1;
        }
        candidate
    }
}

//! Synchronization engine.
//!
//! Keeps the highest-priority connected device active per device type. All
//! state lives behind one mutex; public operations lock it once and run the
//! nested steps (refresh, apply) on the locked state, so an operation that
//! triggers another never re-enters the lock. Audio system notifications are
//! debounced per kind and then handled under the same lock.

pub mod debounce;
pub mod suppression;

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::audio::{AudioDevice, DeviceKey, DeviceType, KnownDevice};
use crate::config::EngineConfig;
use crate::priority::{PriorityStore, ordering};
use crate::system::{AudioSystemInterface, ChangeCallback, FileSystemInterface};

pub use debounce::{DEFAULT_DEBOUNCE_MS, Debouncer, NotificationKind};
pub use suppression::{AppliedChange, ChangeOrigin, SuppressionTracker};

/// Default window in which a default-device change matching the engine's own
/// last change is attributed to the engine
pub const DEFAULT_SUPPRESSION_WINDOW_MS: u64 = 500;

/// Timing parameters for the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub debounce: Duration,
    pub suppression_window: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            suppression_window: Duration::from_millis(DEFAULT_SUPPRESSION_WINDOW_MS),
        }
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            debounce: Duration::from_millis(config.debounce_ms),
            suppression_window: Duration::from_millis(config.suppression_window_ms),
        }
    }
}

/// A non-fatal problem met while running an engine operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineWarning {
    EnumerationFailed {
        message: String,
    },
    DefaultQueryFailed {
        device_type: DeviceType,
        message: String,
    },
    SetDefaultFailed {
        device_type: DeviceType,
        uid: String,
        message: String,
    },
    Storage {
        message: String,
    },
}

impl fmt::Display for EngineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineWarning::EnumerationFailed { message } => {
                write!(f, "Could not list audio devices: {}", message)
            }
            EngineWarning::DefaultQueryFailed {
                device_type,
                message,
            } => write!(
                f,
                "Could not read default {} device: {}",
                device_type.as_str(),
                message
            ),
            EngineWarning::SetDefaultFailed {
                device_type,
                uid,
                message,
            } => write!(
                f,
                "Could not set default {} device to {}: {}",
                device_type.as_str(),
                uid,
                message
            ),
            EngineWarning::Storage { message } => write!(f, "{}", message),
        }
    }
}

/// A default device change committed by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSwitch {
    pub device_type: DeviceType,
    pub uid: String,
    pub name: String,
    pub device_id: String,
}

/// What an engine operation did, plus anything that went wrong on the way.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineReport {
    pub switches: Vec<DeviceSwitch>,
    pub warnings: Vec<EngineWarning>,
}

impl EngineReport {
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Result of replacing a priority order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriorityUpdate {
    pub device_type: DeviceType,
    pub order: Vec<String>,
    pub report: EngineReport,
}

struct EngineState<F: FileSystemInterface> {
    store: PriorityStore<F>,
    auto_mode: bool,
    devices: BTreeMap<DeviceType, Vec<AudioDevice>>,
    defaults: BTreeMap<DeviceType, Option<String>>,
    connected_keys: HashSet<DeviceKey>,
    applied: SuppressionTracker,
}

impl<F: FileSystemInterface> EngineState<F> {
    fn new(store: PriorityStore<F>) -> Self {
        let auto_mode = store.auto_mode();
        Self {
            store,
            auto_mode,
            devices: BTreeMap::new(),
            defaults: BTreeMap::new(),
            connected_keys: HashSet::new(),
            applied: SuppressionTracker::new(),
        }
    }

    fn cached_default(&self, device_type: DeviceType) -> Option<String> {
        self.defaults.get(&device_type).cloned().flatten()
    }

    fn collect_store_warnings(&self, report: &mut EngineReport) {
        report.warnings.extend(
            self.store
                .take_warnings()
                .into_iter()
                .map(|message| EngineWarning::Storage { message }),
        );
    }

    /// Re-read devices and defaults from the audio system. With
    /// `update_memory`, devices that were not connected at the previous
    /// memory refresh are written to the known-device memory.
    fn refresh<A: AudioSystemInterface>(
        &mut self,
        audio: &A,
        update_memory: bool,
        report: &mut EngineReport,
    ) {
        let listed = match audio.list_devices() {
            Ok(devices) => Some(devices),
            Err(e) => {
                warn!("Failed to enumerate audio devices: {:#}", e);
                report.warnings.push(EngineWarning::EnumerationFailed {
                    message: format!("{:#}", e),
                });
                None
            }
        };
        let enumerated = listed.is_some();
        let connected: Vec<AudioDevice> = listed
            .unwrap_or_default()
            .into_iter()
            .filter(|device| device.connected)
            .collect();

        let mut current_keys: HashSet<DeviceKey> =
            connected.iter().map(AudioDevice::key).collect();

        if update_memory && enumerated {
            let newly_connected: Vec<AudioDevice> = connected
                .iter()
                .filter(|device| !self.connected_keys.contains(&device.key()))
                .cloned()
                .collect();

            if !newly_connected.is_empty() {
                for device in &newly_connected {
                    info!("Device connected: {}", device);
                }
                if let Err(e) = self.store.remember_devices(&newly_connected) {
                    warn!("Failed to remember connected devices: {:#}", e);
                    report.warnings.push(EngineWarning::Storage {
                        message: format!("Failed to remember connected devices: {:#}", e),
                    });
                    // Keep them out of the snapshot so the next refresh retries
                    for device in &newly_connected {
                        current_keys.remove(&device.key());
                    }
                }
            }

            // Only memory refreshes move the set forward, so it always holds
            // the keys that were remembered as connected
            self.connected_keys = current_keys;
        }

        // Mode may have been changed by another process
        self.auto_mode = self.store.auto_mode();

        for device_type in DeviceType::ALL {
            let of_type: Vec<AudioDevice> = connected
                .iter()
                .filter(|device| device.device_type == device_type)
                .cloned()
                .collect();
            let sorted = self.store.sort_by_priority(&of_type, device_type);
            self.devices.insert(device_type, sorted);

            match audio.default_device(device_type) {
                Ok(default_id) => {
                    self.defaults.insert(device_type, default_id);
                }
                Err(e) => {
                    warn!(
                        "Failed to read default {} device: {:#}",
                        device_type.as_str(),
                        e
                    );
                    report.warnings.push(EngineWarning::DefaultQueryFailed {
                        device_type,
                        message: format!("{:#}", e),
                    });
                }
            }
        }

        self.collect_store_warnings(report);
        debug!(
            "Refreshed devices: {} input, {} output",
            self.devices.get(&DeviceType::Input).map_or(0, Vec::len),
            self.devices.get(&DeviceType::Output).map_or(0, Vec::len)
        );
    }

    /// Make the highest-priority connected device the default for each
    /// requested type, using the current snapshot.
    fn apply<A: AudioSystemInterface>(
        &mut self,
        audio: &A,
        filter: Option<DeviceType>,
        report: &mut EngineReport,
    ) {
        for device_type in DeviceType::selected(filter) {
            let Some(target) = self
                .devices
                .get(&device_type)
                .and_then(|devices| devices.iter().find(|device| device.connected))
                .cloned()
            else {
                debug!("No connected {} device to apply", device_type.as_str());
                continue;
            };

            if self.cached_default(device_type).as_deref() == Some(target.id.as_str()) {
                debug!(
                    "{} is already the default {} device",
                    target.name,
                    device_type.as_str()
                );
                continue;
            }

            match audio.set_default_device(&target.id, device_type) {
                Ok(()) => {
                    info!(
                        "Switched default {} device to {} ({})",
                        device_type.as_str(),
                        target.name,
                        target.uid
                    );
                    self.defaults.insert(device_type, Some(target.id.clone()));
                    self.applied
                        .record(device_type, target.id.clone(), Instant::now());
                    report.switches.push(DeviceSwitch {
                        device_type,
                        uid: target.uid,
                        name: target.name,
                        device_id: target.id,
                    });
                }
                Err(e) => {
                    warn!(
                        "Failed to set default {} device to {}: {:#}",
                        device_type.as_str(),
                        target.name,
                        e
                    );
                    report.warnings.push(EngineWarning::SetDefaultFailed {
                        device_type,
                        uid: target.uid,
                        message: format!("{:#}", e),
                    });
                }
            }
        }
    }

    fn resort(&mut self) {
        for device_type in DeviceType::ALL {
            if let Some(devices) = self.devices.get(&device_type) {
                let sorted = self.store.sort_by_priority(devices, device_type);
                self.devices.insert(device_type, sorted);
            }
        }
    }
}

struct EngineInner<A: AudioSystemInterface, F: FileSystemInterface> {
    audio: A,
    state: Mutex<EngineState<F>>,
    settings: Mutex<EngineSettings>,
    debouncer: Debouncer,
}

/// Handle to the synchronization engine. Cheap to clone; all clones share
/// the same state.
pub struct SyncEngine<A: AudioSystemInterface, F: FileSystemInterface> {
    inner: Arc<EngineInner<A, F>>,
}

impl<A: AudioSystemInterface, F: FileSystemInterface> Clone for SyncEngine<A, F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: AudioSystemInterface, F: FileSystemInterface> SyncEngine<A, F> {
    /// Create an engine. Must be called from within a tokio runtime, which is
    /// used to run debounced notification handling.
    pub fn new(audio: A, store: PriorityStore<F>, settings: EngineSettings) -> Result<Self> {
        let runtime =
            Handle::try_current().context("The sync engine must be created inside a tokio runtime")?;

        Ok(Self {
            inner: Arc::new(EngineInner {
                audio,
                state: Mutex::new(EngineState::new(store)),
                settings: Mutex::new(settings),
                debouncer: Debouncer::new(runtime),
            }),
        })
    }

    /// Subscribe to audio system notifications, take an initial snapshot that
    /// records connected devices, and apply priorities when in auto mode.
    pub fn start(&self) -> Result<EngineReport> {
        let weak = Arc::downgrade(&self.inner);
        let on_device_list_changed: ChangeCallback = {
            let weak = Weak::clone(&weak);
            Arc::new(move || {
                if let Some(engine) = Self::upgrade(&weak) {
                    engine.on_device_list_changed();
                }
            })
        };
        let on_default_device_changed: ChangeCallback = Arc::new(move || {
            if let Some(engine) = Self::upgrade(&weak) {
                engine.on_default_device_changed();
            }
        });

        self.inner
            .audio
            .subscribe(on_device_list_changed, on_default_device_changed)
            .context("Failed to subscribe to audio device notifications")?;
        info!("Subscribed to audio device notifications");

        let mut state = self.lock_state();
        let mut report = EngineReport::default();
        state.refresh(&self.inner.audio, true, &mut report);
        if state.auto_mode {
            state.apply(&self.inner.audio, None, &mut report);
        }
        Ok(report)
    }

    /// Stop handling notifications that are still waiting out their debounce
    pub fn shutdown(&self) {
        self.inner.debouncer.cancel_all();
        debug!("Cancelled pending notification handling");
    }

    /// Re-read devices and defaults from the audio system
    pub fn refresh(&self, update_memory: bool) -> EngineReport {
        let mut state = self.lock_state();
        let mut report = EngineReport::default();
        state.refresh(&self.inner.audio, update_memory, &mut report);
        report
    }

    /// Make the highest-priority connected device the default for the given
    /// type, or for both types when `device_type` is `None`
    pub fn apply_highest_priority(
        &self,
        device_type: Option<DeviceType>,
        refresh_first: bool,
    ) -> EngineReport {
        let mut state = self.lock_state();
        let mut report = EngineReport::default();
        if refresh_first {
            state.refresh(&self.inner.audio, false, &mut report);
        }
        state.apply(&self.inner.audio, device_type, &mut report);
        report
    }

    /// Replace the priority order for a device type. The requested ids come
    /// first; every other known device (or connected device when nothing is
    /// known yet) follows in its current order.
    pub fn set_priorities(
        &self,
        device_type: DeviceType,
        ordered_uids: &[String],
    ) -> Result<PriorityUpdate> {
        let mut state = self.lock_state();
        let mut report = EngineReport::default();
        state.refresh(&self.inner.audio, false, &mut report);

        let known: Vec<String> = state
            .store
            .known_devices()
            .into_iter()
            .filter(|record| record.device_type == device_type)
            .map(|record| record.uid)
            .collect();
        let base = if known.is_empty() {
            state
                .devices
                .get(&device_type)
                .map(|devices| devices.iter().map(|device| device.uid.clone()).collect())
                .unwrap_or_default()
        } else {
            known
        };

        let order = ordering::merge_priority_order(ordered_uids, &base);
        state.store.set_priority_order(device_type, &order)?;
        state.resort();

        // The snapshot was refreshed above, so apply straight from it
        if state.auto_mode {
            state.apply(&self.inner.audio, Some(device_type), &mut report);
        }
        state.collect_store_warnings(&mut report);

        Ok(PriorityUpdate {
            device_type,
            order,
            report,
        })
    }

    /// Persist the mode. Switching to auto applies priorities immediately.
    pub fn set_mode(&self, auto_mode: bool) -> Result<EngineReport> {
        let mut state = self.lock_state();
        let mut report = EngineReport::default();
        let was_auto = state.store.auto_mode();

        state.store.set_auto_mode(auto_mode)?;
        state.auto_mode = auto_mode;
        info!(
            "Mode set to {}",
            if auto_mode { "auto" } else { "manual" }
        );

        if auto_mode && !was_auto {
            state.refresh(&self.inner.audio, false, &mut report);
            state.apply(&self.inner.audio, None, &mut report);
        }
        state.collect_store_warnings(&mut report);
        Ok(report)
    }

    /// Remove a device from the known-device memory, for one type or both.
    /// Returns the number of records removed.
    pub fn forget(&self, uid: &str, device_type: Option<DeviceType>) -> Result<usize> {
        let state = self.lock_state();
        let mut removed = 0;
        for device_type in DeviceType::selected(device_type) {
            if state.store.forget(uid, device_type)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Entry point for the audio system's device list notification
    pub fn on_device_list_changed(&self) {
        let engine = self.clone();
        let delay = self.settings().debounce;
        self.inner
            .debouncer
            .schedule(NotificationKind::DeviceListChanged, delay, move || {
                engine.handle_device_list_change();
            });
    }

    /// Entry point for the audio system's default device notification
    pub fn on_default_device_changed(&self) {
        let engine = self.clone();
        let delay = self.settings().debounce;
        self.inner
            .debouncer
            .schedule(NotificationKind::DefaultDeviceChanged, delay, move || {
                engine.handle_default_device_change();
            });
    }

    /// Debounced handling of a device list change
    pub fn handle_device_list_change(&self) -> EngineReport {
        debug!("Handling device list change");
        let mut state = self.lock_state();
        let mut report = EngineReport::default();
        state.refresh(&self.inner.audio, true, &mut report);
        if state.auto_mode {
            state.apply(&self.inner.audio, None, &mut report);
        }
        report
    }

    /// Debounced handling of a default device change. Changes that match what
    /// the engine itself applied within the suppression window only update
    /// the cached defaults; anything else is treated as an outside change.
    pub fn handle_default_device_change(&self) -> EngineReport {
        let window = self.settings().suppression_window;
        let mut state = self.lock_state();
        let mut report = EngineReport::default();

        let mut changes = Vec::new();
        for device_type in DeviceType::ALL {
            match self.inner.audio.default_device(device_type) {
                Ok(actual) => {
                    if actual != state.cached_default(device_type) {
                        changes.push((device_type, actual));
                    }
                }
                Err(e) => {
                    warn!(
                        "Failed to read default {} device: {:#}",
                        device_type.as_str(),
                        e
                    );
                    report.warnings.push(EngineWarning::DefaultQueryFailed {
                        device_type,
                        message: format!("{:#}", e),
                    });
                }
            }
        }

        match state.applied.classify(&changes, Instant::now(), window) {
            ChangeOrigin::Unchanged => {
                debug!("Default devices unchanged");
            }
            ChangeOrigin::SelfCaused => {
                debug!("Ignoring default device change caused by the engine");
                for (device_type, actual) in changes {
                    state.defaults.insert(device_type, actual);
                }
            }
            ChangeOrigin::External => {
                info!("Default device changed externally");
                state.refresh(&self.inner.audio, false, &mut report);
                if state.auto_mode {
                    state.apply(&self.inner.audio, None, &mut report);
                }
            }
        }
        state.collect_store_warnings(&mut report);
        report
    }

    pub fn connected_devices(&self, device_type: DeviceType) -> Vec<AudioDevice> {
        self.lock_state()
            .devices
            .get(&device_type)
            .cloned()
            .unwrap_or_default()
    }

    pub fn known_devices(&self) -> Vec<KnownDevice> {
        self.lock_state().store.known_devices()
    }

    pub fn priority_order(&self, device_type: DeviceType) -> Vec<String> {
        self.lock_state().store.priority_order(device_type)
    }

    pub fn default_device_id(&self, device_type: DeviceType) -> Option<String> {
        self.lock_state().cached_default(device_type)
    }

    /// The connected device that is currently the default, if any
    pub fn default_device(&self, device_type: DeviceType) -> Option<AudioDevice> {
        let state = self.lock_state();
        let default_id = state.cached_default(device_type)?;
        state
            .devices
            .get(&device_type)?
            .iter()
            .find(|device| device.id == default_id)
            .cloned()
    }

    pub fn is_auto_mode(&self) -> bool {
        self.lock_state().auto_mode
    }

    /// The last default change the engine made for a device type
    pub fn applied_change(&self, device_type: DeviceType) -> Option<AppliedChange> {
        self.lock_state().applied.marker(device_type).cloned()
    }

    /// Warnings collected by store reads outside of engine operations
    pub fn take_warnings(&self) -> Vec<EngineWarning> {
        let state = self.lock_state();
        let mut report = EngineReport::default();
        state.collect_store_warnings(&mut report);
        report.warnings
    }

    pub fn settings(&self) -> EngineSettings {
        *self
            .inner
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn update_settings(&self, settings: EngineSettings) {
        *self
            .inner
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = settings;
        info!(
            "Engine timing updated: debounce {:?}, suppression window {:?}",
            settings.debounce, settings.suppression_window
        );
    }

    /// Access the audio system the engine drives
    pub fn audio_system(&self) -> &A {
        &self.inner.audio
    }

    fn upgrade(weak: &Weak<EngineInner<A, F>>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState<F>> {
        // State is only mutated through complete steps, so a poisoned lock
        // still holds a consistent snapshot
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

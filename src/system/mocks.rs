use anyhow::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::audio::{AudioDevice, DeviceType};
use crate::system::traits::{AudioSystemInterface, ChangeCallback, FileSystemInterface};

/// Mock audio system for testing - provides controllable device behavior
#[derive(Clone, Default)]
pub struct MockAudioSystem {
    pub devices: Arc<Mutex<Vec<AudioDevice>>>,
    pub defaults: Arc<Mutex<HashMap<DeviceType, String>>>,
    pub device_list_callbacks: Arc<Mutex<Vec<ChangeCallback>>>,
    pub default_device_callbacks: Arc<Mutex<Vec<ChangeCallback>>>,
    pub set_default_calls: Arc<Mutex<Vec<(String, DeviceType)>>>, // (device_id, device_type)
    pub list_calls: Arc<AtomicUsize>,
    pub should_fail_enumeration: Arc<AtomicBool>,
    pub should_fail_set_default: Arc<AtomicBool>,
    pub echo_default_changes: Arc<AtomicBool>,
}

impl MockAudioSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device and notify listeners that the device list changed
    pub fn add_device(&self, device: AudioDevice) {
        self.devices.lock().unwrap().push(device);
        self.trigger_device_list_change();
    }

    /// Add a device without notifying anyone
    pub fn add_device_silently(&self, device: AudioDevice) {
        self.devices.lock().unwrap().push(device);
    }

    /// Remove a device by uid and notify listeners
    pub fn remove_device(&self, uid: &str, device_type: DeviceType) {
        self.devices
            .lock()
            .unwrap()
            .retain(|d| !(d.uid == uid && d.device_type == device_type));
        self.trigger_device_list_change();
    }

    /// Change the default device from outside the engine and notify listeners
    pub fn set_system_default(&self, device_id: &str, device_type: DeviceType) {
        self.set_system_default_silently(device_id, device_type);
        self.trigger_default_device_change();
    }

    /// Change the default device without notifying anyone
    pub fn set_system_default_silently(&self, device_id: &str, device_type: DeviceType) {
        self.defaults
            .lock()
            .unwrap()
            .insert(device_type, device_id.to_string());
    }

    /// Current default id as the mock sees it
    pub fn current_default(&self, device_type: DeviceType) -> Option<String> {
        self.defaults.lock().unwrap().get(&device_type).cloned()
    }

    /// Fire every registered device list callback
    pub fn trigger_device_list_change(&self) {
        // Clone out of the lock so callbacks may call back into the mock
        let callbacks = self.device_list_callbacks.lock().unwrap().clone();
        for callback in callbacks {
            callback();
        }
    }

    /// Fire every registered default device callback
    pub fn trigger_default_device_change(&self) {
        let callbacks = self.default_device_callbacks.lock().unwrap().clone();
        for callback in callbacks {
            callback();
        }
    }

    /// Get all set default calls that were made
    pub fn get_set_default_calls(&self) -> Vec<(String, DeviceType)> {
        self.set_default_calls.lock().unwrap().clone()
    }

    /// Clear the history of set default calls
    pub fn clear_set_default_calls(&self) {
        self.set_default_calls.lock().unwrap().clear();
    }

    /// Number of times the device list was queried
    pub fn list_call_count(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Configure the mock to fail enumeration
    pub fn set_enumeration_failure(&self, should_fail: bool) {
        self.should_fail_enumeration.store(should_fail, Ordering::SeqCst);
    }

    /// Configure the mock to reject default device changes
    pub fn set_default_failure(&self, should_fail: bool) {
        self.should_fail_set_default.store(should_fail, Ordering::SeqCst);
    }

    /// Make successful default changes fire the default device callbacks,
    /// the way CoreAudio echoes a change back to its listeners
    pub fn set_echo_default_changes(&self, echo: bool) {
        self.echo_default_changes.store(echo, Ordering::SeqCst);
    }

    /// Get count of registered callbacks
    pub fn callback_count(&self) -> usize {
        self.device_list_callbacks.lock().unwrap().len()
            + self.default_device_callbacks.lock().unwrap().len()
    }
}

impl AudioSystemInterface for MockAudioSystem {
    fn list_devices(&self) -> Result<Vec<AudioDevice>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail_enumeration.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("Mock enumeration failure"));
        }
        Ok(self.devices.lock().unwrap().clone())
    }

    fn default_device(&self, device_type: DeviceType) -> Result<Option<String>> {
        Ok(self.current_default(device_type))
    }

    fn set_default_device(&self, device_id: &str, device_type: DeviceType) -> Result<()> {
        self.set_default_calls
            .lock()
            .unwrap()
            .push((device_id.to_string(), device_type));

        if self.should_fail_set_default.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("Mock set default failure"));
        }

        let known = self
            .devices
            .lock()
            .unwrap()
            .iter()
            .any(|d| d.id == device_id && d.device_type == device_type);
        if !known {
            return Err(anyhow::anyhow!(
                "Mock {} device '{}' not found",
                device_type.as_str(),
                device_id
            ));
        }

        self.set_system_default_silently(device_id, device_type);
        if self.echo_default_changes.load(Ordering::SeqCst) {
            self.trigger_default_device_change();
        }
        Ok(())
    }

    fn subscribe(
        &self,
        on_device_list_changed: ChangeCallback,
        on_default_device_changed: ChangeCallback,
    ) -> Result<()> {
        self.device_list_callbacks
            .lock()
            .unwrap()
            .push(on_device_list_changed);
        self.default_device_callbacks
            .lock()
            .unwrap()
            .push(on_default_device_changed);
        Ok(())
    }
}

/// Mock file system for testing - provides controllable file operations
#[derive(Clone, Default)]
pub struct MockFileSystem {
    pub files: Arc<Mutex<HashMap<PathBuf, String>>>,
    pub read_calls: Arc<Mutex<Vec<PathBuf>>>,
    pub write_calls: Arc<Mutex<Vec<(PathBuf, String)>>>,
    pub directory_creation_calls: Arc<Mutex<Vec<PathBuf>>>,
    pub should_fail_read: Arc<AtomicBool>,
    pub should_fail_write: Arc<AtomicBool>,
    pub should_fail_create_dir: Arc<AtomicBool>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file to the mock file system
    pub fn add_file<P: AsRef<Path>>(&self, path: P, content: String) {
        self.files
            .lock()
            .unwrap()
            .insert(path.as_ref().to_path_buf(), content);
    }

    /// Remove a file from the mock file system
    pub fn remove_file<P: AsRef<Path>>(&self, path: P) {
        self.files.lock().unwrap().remove(path.as_ref());
    }

    /// Current content of a file, if present
    pub fn file_content<P: AsRef<Path>>(&self, path: P) -> Option<String> {
        self.files.lock().unwrap().get(path.as_ref()).cloned()
    }

    /// Get all read calls that were made
    pub fn get_read_calls(&self) -> Vec<PathBuf> {
        self.read_calls.lock().unwrap().clone()
    }

    /// Get all write calls that were made
    pub fn get_write_calls(&self) -> Vec<(PathBuf, String)> {
        self.write_calls.lock().unwrap().clone()
    }

    /// Get all directory creation calls that were made
    pub fn get_directory_creation_calls(&self) -> Vec<PathBuf> {
        self.directory_creation_calls.lock().unwrap().clone()
    }

    /// Clear all call histories
    pub fn clear_call_history(&self) {
        self.read_calls.lock().unwrap().clear();
        self.write_calls.lock().unwrap().clear();
        self.directory_creation_calls.lock().unwrap().clear();
    }

    /// Configure the mock to fail read operations
    pub fn set_read_failure(&self, should_fail: bool) {
        self.should_fail_read.store(should_fail, Ordering::SeqCst);
    }

    /// Configure the mock to fail write operations
    pub fn set_write_failure(&self, should_fail: bool) {
        self.should_fail_write.store(should_fail, Ordering::SeqCst);
    }

    /// Configure the mock to fail directory creation
    pub fn set_create_dir_failure(&self, should_fail: bool) {
        self.should_fail_create_dir.store(should_fail, Ordering::SeqCst);
    }
}

impl FileSystemInterface for MockFileSystem {
    fn read_file(&self, path: &Path) -> Result<String> {
        self.read_calls.lock().unwrap().push(path.to_path_buf());

        if self.should_fail_read.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("Mock read failure"));
        }

        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("File not found: {}", path.display()))
    }

    fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        self.write_calls
            .lock()
            .unwrap()
            .push((path.to_path_buf(), content.to_string()));

        if self.should_fail_write.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("Mock write failure"));
        }

        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), content.to_string());
        Ok(())
    }

    fn file_exists(&self, path: &Path) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        self.directory_creation_calls
            .lock()
            .unwrap()
            .push(path.to_path_buf());

        if self.should_fail_create_dir.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("Mock create directory failure"));
        }

        Ok(())
    }
}

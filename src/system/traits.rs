use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use crate::audio::{AudioDevice, DeviceType};

/// Change notification handed to the audio system. May be invoked from any
/// thread, spuriously, and more than once per logical change.
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// Trait for audio system operations - abstracts CoreAudio interactions
pub trait AudioSystemInterface: Send + Sync + 'static {
    /// Enumerate all currently connected audio devices, one entry per direction
    fn list_devices(&self) -> Result<Vec<AudioDevice>>;

    /// Get the ephemeral id of the current default device for a direction
    fn default_device(&self, device_type: DeviceType) -> Result<Option<String>>;

    /// Make the device with the given ephemeral id the system default
    fn set_default_device(&self, device_id: &str, device_type: DeviceType) -> Result<()>;

    /// Register callbacks for device list changes and default device changes
    fn subscribe(
        &self,
        on_device_list_changed: ChangeCallback,
        on_default_device_changed: ChangeCallback,
    ) -> Result<()>;
}

/// Trait for file system operations - abstracts std::fs for testability
pub trait FileSystemInterface: Send + Sync + 'static {
    /// Read the entire contents of a file
    fn read_file(&self, path: &Path) -> Result<String>;

    /// Replace the contents of a file; readers never observe a partial write
    fn write_file(&self, path: &Path, content: &str) -> Result<()>;

    /// Check if a file exists
    fn file_exists(&self, path: &Path) -> bool;

    /// Create a directory and its parents
    fn create_dir(&self, path: &Path) -> Result<()>;
}

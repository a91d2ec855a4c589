use anyhow::{Context, Result, anyhow};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::audio::{AudioDevice, DeviceType};
use crate::system::traits::{AudioSystemInterface, ChangeCallback, FileSystemInterface};

/// Production implementation of FileSystemInterface using std::fs
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardFileSystem;

impl StandardFileSystem {
    fn temporary_path(path: &Path) -> PathBuf {
        let mut name = OsString::from(path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }
}

impl FileSystemInterface for StandardFileSystem {
    fn read_file(&self, path: &Path) -> Result<String> {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read file: {}", path.display()))
    }

    fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        // Write next to the target and rename over it so the replace is atomic
        let temporary = Self::temporary_path(path);
        std::fs::write(&temporary, content)
            .with_context(|| format!("Failed to write file: {}", temporary.display()))?;
        std::fs::rename(&temporary, path).with_context(|| {
            format!(
                "Failed to move {} into place at {}",
                temporary.display(),
                path.display()
            )
        })
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))
    }
}

/// Audio system used on platforms without a supported backend.
///
/// Every hardware query fails, which the engine reports as a warning, so the
/// store-backed commands remain usable.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedAudioSystem;

impl UnsupportedAudioSystem {
    pub fn new() -> Result<Self> {
        Ok(Self)
    }

    fn unsupported() -> anyhow::Error {
        anyhow!(
            "Audio device control is not supported on {}",
            std::env::consts::OS
        )
    }
}

impl AudioSystemInterface for UnsupportedAudioSystem {
    fn list_devices(&self) -> Result<Vec<AudioDevice>> {
        Err(Self::unsupported())
    }

    fn default_device(&self, _device_type: DeviceType) -> Result<Option<String>> {
        Err(Self::unsupported())
    }

    fn set_default_device(&self, _device_id: &str, _device_type: DeviceType) -> Result<()> {
        Err(Self::unsupported())
    }

    fn subscribe(
        &self,
        _on_device_list_changed: ChangeCallback,
        _on_default_device_changed: ChangeCallback,
    ) -> Result<()> {
        Err(Self::unsupported())
    }
}

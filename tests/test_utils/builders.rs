//! Test utility builders for creating audio devices and ready-to-use engines
//!
//! Individual methods may not be used by all tests, so dead code warnings are suppressed.

#![allow(dead_code)]

use audio_priority_sync::audio::{AudioDevice, DeviceType};
use audio_priority_sync::engine::{EngineSettings, SyncEngine};
use audio_priority_sync::priority::PriorityStore;
use audio_priority_sync::system::{MockAudioSystem, MockFileSystem};
use std::path::PathBuf;
use std::time::Duration;

/// Builder for creating test AudioDevice instances
pub struct AudioDeviceBuilder {
    uid: String,
    id: String,
    name: Option<String>,
    device_type: DeviceType,
    connected: bool,
}

impl AudioDeviceBuilder {
    pub fn new() -> Self {
        Self {
            uid: "test-device".to_string(),
            id: "1".to_string(),
            name: None,
            device_type: DeviceType::Output,
            connected: true,
        }
    }

    pub fn uid(mut self, uid: &str) -> Self {
        self.uid = uid.to_string();
        self
    }

    pub fn id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn input(mut self) -> Self {
        self.device_type = DeviceType::Input;
        self
    }

    pub fn output(mut self) -> Self {
        self.device_type = DeviceType::Output;
        self
    }

    pub fn disconnected(mut self) -> Self {
        self.connected = false;
        self
    }

    pub fn build(self) -> AudioDevice {
        let name = self
            .name
            .unwrap_or_else(|| format!("Device {}", self.uid));
        AudioDevice::new(self.uid, self.id, name, self.device_type).set_connected(self.connected)
    }
}

impl Default for AudioDeviceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Shorthand for a connected output device
pub fn output(uid: &str, id: &str) -> AudioDevice {
    AudioDeviceBuilder::new().uid(uid).id(id).output().build()
}

/// Shorthand for a connected input device
pub fn input(uid: &str, id: &str) -> AudioDevice {
    AudioDeviceBuilder::new().uid(uid).id(id).input().build()
}

pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

/// Mock audio system, mock file system and an engine wired to both
pub struct TestEnvironment {
    pub audio: MockAudioSystem,
    pub file_system: MockFileSystem,
    pub engine: SyncEngine<MockAudioSystem, MockFileSystem>,
}

impl TestEnvironment {
    pub fn state_dir() -> PathBuf {
        PathBuf::from("/test/state")
    }

    /// Must be called inside a tokio runtime
    pub fn new(devices: Vec<AudioDevice>) -> Self {
        Self::with_settings(devices, EngineSettings::default())
    }

    pub fn with_debounce(devices: Vec<AudioDevice>, debounce: Duration) -> Self {
        Self::with_settings(
            devices,
            EngineSettings {
                debounce,
                ..EngineSettings::default()
            },
        )
    }

    pub fn with_settings(devices: Vec<AudioDevice>, settings: EngineSettings) -> Self {
        let audio = MockAudioSystem::new();
        for device in devices {
            audio.add_device_silently(device);
        }
        let file_system = MockFileSystem::new();
        let engine = SyncEngine::new(audio.clone(), Self::open_store(&file_system), settings)
            .expect("engine should be created inside a runtime");

        Self {
            audio,
            file_system,
            engine,
        }
    }

    /// A second store over the same files, as another process would see them
    pub fn store(&self) -> PriorityStore<MockFileSystem> {
        Self::open_store(&self.file_system)
    }

    pub fn set_order(&self, device_type: DeviceType, order: &[&str]) {
        self.store()
            .set_priority_order(device_type, &ids(order))
            .expect("priority order should be stored");
    }

    pub fn set_calls(&self) -> Vec<(String, DeviceType)> {
        self.audio.get_set_default_calls()
    }

    fn open_store(file_system: &MockFileSystem) -> PriorityStore<MockFileSystem> {
        PriorityStore::open(file_system.clone(), Self::state_dir())
            .expect("store should open on the mock file system")
    }
}

/// Helper functions for creating common test scenarios
pub mod scenarios {
    use super::*;

    /// Two connected outputs, one connected input and a USB DAC the
    /// system still lists as disconnected
    pub fn desk_setup() -> Vec<AudioDevice> {
        vec![
            AudioDeviceBuilder::new()
                .uid("usb-dac")
                .id("10")
                .name("USB DAC")
                .output()
                .disconnected()
                .build(),
            AudioDeviceBuilder::new()
                .uid("out-1")
                .id("11")
                .name("MacBook Pro Speakers")
                .output()
                .build(),
            AudioDeviceBuilder::new()
                .uid("out-2")
                .id("12")
                .name("Audioengine 2+")
                .output()
                .build(),
            AudioDeviceBuilder::new()
                .uid("in-1")
                .id("21")
                .name("MacBook Pro Microphone")
                .input()
                .build(),
        ]
    }
}

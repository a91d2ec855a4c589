use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Direction of an audio device. Each direction keeps its own priority order
/// and its own system default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Input,
    Output,
}

impl DeviceType {
    pub const ALL: [DeviceType; 2] = [DeviceType::Input, DeviceType::Output];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Input => "input",
            DeviceType::Output => "output",
        }
    }

    /// The requested types, or both when none is given.
    pub fn selected(filter: Option<DeviceType>) -> Vec<DeviceType> {
        match filter {
            Some(device_type) => vec![device_type],
            None => Self::ALL.to_vec(),
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Input => write!(f, "Input"),
            DeviceType::Output => write!(f, "Output"),
        }
    }
}

impl FromStr for DeviceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "input" | "in" | "mic" => Ok(DeviceType::Input),
            "output" | "out" | "speaker" => Ok(DeviceType::Output),
            other => Err(anyhow!("Unknown device type '{}' (expected input or output)", other)),
        }
    }
}

/// A device as reported by the audio system during one enumeration.
///
/// `uid` survives reconnects and is the identity used for priorities and
/// memory. `id` is only valid while the device stays connected and is what
/// the audio system expects when changing the default device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDevice {
    pub uid: String,
    pub id: String,
    pub name: String,
    pub device_type: DeviceType,
    pub connected: bool,
}

/// Identity of a device within its direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    pub uid: String,
    pub device_type: DeviceType,
}

impl fmt::Display for AudioDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): {} [{}]",
            self.name,
            self.device_type,
            self.uid,
            if self.connected {
                "Connected"
            } else {
                "Disconnected"
            }
        )
    }
}

impl AudioDevice {
    pub fn new(uid: String, id: String, name: String, device_type: DeviceType) -> Self {
        Self {
            uid,
            id,
            name,
            device_type,
            connected: true,
        }
    }

    pub fn set_connected(mut self, connected: bool) -> Self {
        self.connected = connected;
        self
    }

    pub fn key(&self) -> DeviceKey {
        DeviceKey {
            uid: self.uid.clone(),
            device_type: self.device_type,
        }
    }
}

/// Durable memory of a device that has been seen connected at least once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownDevice {
    pub uid: String,
    pub device_type: DeviceType,
    pub name: String,
    pub last_seen: DateTime<Utc>,
}

impl KnownDevice {
    pub fn key(&self) -> DeviceKey {
        DeviceKey {
            uid: self.uid.clone(),
            device_type: self.device_type,
        }
    }

    pub fn matches(&self, uid: &str, device_type: DeviceType) -> bool {
        self.uid == uid && self.device_type == device_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_type_parsing() {
        assert_eq!("output".parse::<DeviceType>().unwrap(), DeviceType::Output);
        assert_eq!(" Input ".parse::<DeviceType>().unwrap(), DeviceType::Input);
        assert_eq!("mic".parse::<DeviceType>().unwrap(), DeviceType::Input);
        assert!("both".parse::<DeviceType>().is_err());
    }

    #[test]
    fn test_selected_types() {
        assert_eq!(DeviceType::selected(None), vec![DeviceType::Input, DeviceType::Output]);
        assert_eq!(
            DeviceType::selected(Some(DeviceType::Output)),
            vec![DeviceType::Output]
        );
    }

    #[test]
    fn test_device_display() {
        let device = AudioDevice::new(
            "uid-1".to_string(),
            "42".to_string(),
            "Studio Monitors".to_string(),
            DeviceType::Output,
        );
        assert_eq!(
            device.to_string(),
            "Studio Monitors (Output): uid-1 [Connected]"
        );
        assert_eq!(
            device.set_connected(false).to_string(),
            "Studio Monitors (Output): uid-1 [Disconnected]"
        );
    }
}

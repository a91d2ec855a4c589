pub mod device;

pub use device::{AudioDevice, DeviceKey, DeviceType, KnownDevice};

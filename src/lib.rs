pub mod audio;
pub mod cli;
pub mod config;
pub mod engine;
pub mod logging;
pub mod priority;
pub mod service;
pub mod system;

pub use audio::{AudioDevice, DeviceType, KnownDevice};
pub use config::Config;
pub use engine::{EngineReport, EngineSettings, EngineWarning, SyncEngine};
pub use priority::PriorityStore;
pub use service::PriorityService;

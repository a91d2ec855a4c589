pub mod loader;
pub mod types;

pub use loader::{ConfigLoader, default_config_path};
pub use types::{Config, EngineConfig, GeneralConfig, LoggingSettings};

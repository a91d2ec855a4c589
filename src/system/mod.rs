pub mod adapters;
pub mod traits;

#[cfg(target_os = "macos")]
pub mod coreaudio;

// Mock implementations for testing
#[cfg(any(test, feature = "test-mocks"))]
pub mod mocks;

// Re-export traits and adapters for easy access
pub use adapters::*;
pub use traits::*;

#[cfg(target_os = "macos")]
pub use coreaudio::CoreAudioSystem;

// Re-export mocks when testing
#[cfg(any(test, feature = "test-mocks"))]
pub use mocks::*;

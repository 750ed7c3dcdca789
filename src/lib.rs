pub mod api;
pub mod chat;
pub mod config;
pub mod detection;
pub mod error;
pub mod io;
pub mod logging;
pub mod monitor;

// Re-export the main error types for convenience
pub use error::{WaveWatchError, WaveWatchResult};

pub use config::{AppConfig, ConfigManager};
pub use detection::{DetectionState, HotMomentDetector, PatternScanner, SharedDetection};
pub use monitor::{MonitorBot, MonitorSnapshot};

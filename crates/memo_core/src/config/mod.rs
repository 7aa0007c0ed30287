//! `memo.toml`: tool locations, scratch paths and per-component tuning.
//!
//! Every key has a default, so a partial or missing file still yields
//! complete [`Settings`]. [`ConfigManager`] owns the file on disk.
//!
//! # Example
//!
//! ```no_run
//! use memo_core::config::{ConfigManager, ConfigSection};
//!
//! let mut config = ConfigManager::new(".config/memo.toml");
//! config.load_or_create().unwrap();
//!
//! println!("Encoder: {}", config.settings().tools.ffmpeg);
//!
//! config.settings_mut().conversion.verify_output = false;
//! config.update_section(ConfigSection::Conversion).unwrap();
//! ```

mod manager;
mod settings;

pub use manager::{ConfigError, ConfigManager, ConfigResult};
pub use settings::{
    ConfigSection, ConversionSettings, LoggingSettings, MonitorSettings, PathSettings, Settings,
    ToolSettings, WaveformSettings,
};

//! Configuration management.

mod chat_config;
mod settings;

pub use chat_config::{ChatConfig, ConfigError};
pub use settings::{Settings, SettingsError, CONFIG_KEY};

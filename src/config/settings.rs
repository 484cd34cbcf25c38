//! Settings management via SQLite.

use crate::db::Database;
use thiserror::Error;

use super::chat_config::{ChatConfig, ConfigError};

/// Settings key holding the serialized [`ChatConfig`].
pub const CONFIG_KEY: &str = "config";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Settings manager backed by SQLite.
pub struct Settings<'a> {
    db: &'a Database,
}

impl<'a> Settings<'a> {
    /// Create a new settings manager.
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Get a setting value.
    pub fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        let result: Result<String, _> = self.db.conn().query_row(
            "SELECT value FROM settings WHERE key = ?",
            [key],
            |row| row.get(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(SettingsError::Database(e)),
        }
    }

    /// Set a setting value.
    pub fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        self.db.conn().execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, unixepoch())
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            [key, value],
        )?;
        Ok(())
    }

    /// Delete a setting.
    pub fn delete(&self, key: &str) -> Result<(), SettingsError> {
        self.db
            .conn()
            .execute("DELETE FROM settings WHERE key = ?", [key])?;
        Ok(())
    }

    /// Load the chat configuration, falling back to defaults when none is stored.
    pub fn chat_config(&self) -> Result<ChatConfig, SettingsError> {
        match self.get(CONFIG_KEY)? {
            Some(raw) => Ok(ChatConfig::from_json(&raw)?),
            None => Ok(ChatConfig::default()),
        }
    }

    /// Validate and persist the chat configuration.
    pub fn save_chat_config(&self, config: &ChatConfig) -> Result<(), SettingsError> {
        config.validate()?;
        self.set(CONFIG_KEY, &config.to_json()?)
    }

    /// Forget the stored configuration so defaults apply again.
    pub fn reset_chat_config(&self) -> Result<(), SettingsError> {
        self.delete(CONFIG_KEY)
    }
}

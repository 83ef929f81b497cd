//! Process-wide settings for the TabNet engine.
//!
//! Values come from built-in defaults, an optional `.env` file and
//! `TABNET__*` environment variables, in that order of precedence.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSettings {
    /// Folder that receives checkpoint files when the caller does not supply one.
    pub save_folder: PathBuf,

    /// Model name used as part of every checkpoint file name.
    pub model_name: String,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            save_folder: PathBuf::from("runs/model_backups"),
            model_name: "forest_cover".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `tracing_subscriber::EnvFilter` directive used by the demo binary.
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Checkpoint location defaults
    pub checkpoint: CheckpointSettings,

    /// Logging
    pub logging: LoggingSettings,
}

impl Settings {
    /// Create a new Settings instance from environment variables and config files.
    /// Environment variables are prefixed with `TABNET__`, e.g. `TABNET__CHECKPOINT__SAVE_FOLDER`.
    pub fn new() -> Result<Self, ConfigError> {
        let defaults = Settings::default();
        let settings = Config::builder()
            .set_default(
                "checkpoint.save_folder",
                defaults.checkpoint.save_folder.to_string_lossy().to_string(),
            )?
            .set_default("checkpoint.model_name", defaults.checkpoint.model_name)?
            .set_default("logging.filter", defaults.logging.filter)?
            .add_source(File::with_name(".env").required(false))
            .add_source(
                Environment::with_prefix("TABNET")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        settings.try_deserialize()
    }
}

static SETTINGS: OnceLock<Settings> = OnceLock::new();

/// Get the global settings instance, initializing it if necessary.
pub fn settings() -> &'static Settings {
    SETTINGS.get_or_init(|| Settings::new().unwrap_or_else(|_| Settings::default()))
}

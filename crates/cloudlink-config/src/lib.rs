//! Settings discovery and logging setup for cloudlink

pub mod error;
pub mod logging;
pub mod settings;

pub use error::*;
pub use settings::Settings;

use std::path::PathBuf;

pub const ENV_CONFIG_PATH: &str = "CLOUDLINK_CONFIG_PATH";

const CANDIDATES: [&str; 2] = ["cloudlink.local.yaml", "cloudlink.yaml"];

/// User-level cloudlink config directory, created if missing
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("cloudlink");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Find the settings file
///
/// Search order:
/// 1. `CLOUDLINK_CONFIG_PATH`
/// 2. current directory: cloudlink.local.yaml, cloudlink.yaml
/// 3. `./.cloudlink/`, same order
/// 4. `~/.config/cloudlink/cloudlink.yaml`
pub fn find_config_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(ENV_CONFIG_PATH) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!(path = %path.display(), "{} points at a missing file", ENV_CONFIG_PATH);
    }

    let current_dir = std::env::current_dir()?;

    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let local_dir = current_dir.join(".cloudlink");
    if local_dir.is_dir() {
        for filename in &CANDIDATES {
            let path = local_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("cloudlink").join("cloudlink.yaml");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::SettingsFileNotFound)
}

/// Load settings from the discovered file, or defaults when there is none,
/// then apply environment overrides
pub fn load_settings() -> Result<Settings> {
    let mut settings = match find_config_file() {
        Ok(path) => Settings::from_file(&path)?,
        Err(ConfigError::SettingsFileNotFound) => {
            tracing::debug!("No settings file found, using defaults");
            Settings::default()
        }
        Err(e) => return Err(e),
    };
    settings.apply_env()?;
    Ok(settings)
}

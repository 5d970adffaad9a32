//! Settings file loader and serialization.

use crate::error::ConfigError;
use std::fs;
use std::path::{Path, PathBuf};

use super::BuildSettings;

/// Get the global settings path: `<config dir>/demoforge/settings.json`
pub fn get_global_settings_path() -> Result<PathBuf, ConfigError> {
    let config_dir = dirs::config_dir().ok_or_else(|| {
        ConfigError::ValidationFailed("Cannot determine config directory".to_string())
    })?;
    Ok(config_dir.join("demoforge").join("settings.json"))
}

/// Load settings from a JSON file.
pub fn load_settings_from_file(path: &Path) -> Result<BuildSettings, ConfigError> {
    validate_config_path(path)?;

    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(format!("Settings file not found at: {}", path.display()))
        } else {
            ConfigError::IoError(e)
        }
    })?;

    let settings: BuildSettings = serde_json::from_str(&content)?;
    Ok(settings)
}

/// Save settings to a JSON file, creating the parent directory.
pub fn save_settings_to_file(settings: &BuildSettings, path: &Path) -> Result<(), ConfigError> {
    validate_config_path(path)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let json_content = serde_json::to_string_pretty(settings)?;
    fs::write(path, json_content)?;
    Ok(())
}

/// Validate a settings path (.json extension required).
pub fn validate_config_path(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "Settings path cannot be empty".to_string(),
        ));
    }

    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => Ok(()),
        _ => Err(ConfigError::ValidationFailed(format!(
            "Settings file must have .json extension: {}",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_config_path() {
        assert!(validate_config_path(Path::new("settings.json")).is_ok());
        assert!(validate_config_path(Path::new("settings.toml")).is_err());
        assert!(validate_config_path(Path::new("")).is_err());
    }

    #[test]
    fn test_missing_file_maps_to_not_found() {
        let temp = tempfile::tempdir().unwrap();
        let result = load_settings_from_file(&temp.path().join("absent.json"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_global_path_shape() {
        if let Ok(path) = get_global_settings_path() {
            assert!(path.ends_with("demoforge/settings.json"));
        }
    }
}

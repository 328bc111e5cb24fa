//! TOML config file loading with environment overrides.

use std::path::Path;

use reef_common::ConfigError;
use tracing::info;

use crate::schema::ReefConfig;
use crate::validation;

/// Environment variable carrying the AI backend API key. Takes
/// precedence over the `agent.api_key` config field.
pub const AGENT_API_KEY_ENV: &str = "REEF_AGENT_API_KEY";

/// Load config from a specific TOML file path.
pub fn load_from_path(path: &Path) -> Result<ReefConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ParseError(format!("failed to read {}: {e}", path.display())))?;

    let mut config: ReefConfig = toml::from_str(&content)
        .map_err(|e| ConfigError::ParseError(format!("failed to parse TOML: {e}")))?;

    apply_env_overrides(&mut config);
    validation::validate(&config)?;

    info!("loaded config from {}", path.display());
    Ok(config)
}

/// Load config from the platform default path, or defaults plus
/// environment overrides when no file exists.
///
/// On Linux: `~/.config/storyreef/config.toml`.
pub fn load_default() -> Result<ReefConfig, ConfigError> {
    match default_config_path() {
        Some(path) if path.exists() => load_from_path(&path),
        _ => {
            let mut config = ReefConfig::default();
            apply_env_overrides(&mut config);
            validation::validate(&config)?;
            Ok(config)
        }
    }
}

/// Platform-specific default config file path.
pub fn default_config_path() -> Option<std::path::PathBuf> {
    dirs::config_dir().map(|dir| dir.join("storyreef").join("config.toml"))
}

fn apply_env_overrides(config: &mut ReefConfig) {
    if let Ok(key) = std::env::var(AGENT_API_KEY_ENV) {
        if !key.is_empty() {
            config.agent.api_key = key;
        }
    }
}

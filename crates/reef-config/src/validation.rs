//! Configuration validation.

use reef_common::ConfigError;

use crate::schema::ReefConfig;

/// Run all validations on a config, collecting every error.
pub fn validate(config: &ReefConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    if config.game.time_limit_secs == 0 {
        errors.push("game.time_limit_secs must be positive".into());
    }
    if config.game.room_players_limit == 0 {
        errors.push("game.room_players_limit must be positive".into());
    }
    if config.game.event_history_capacity == 0 {
        errors.push("game.event_history_capacity must be positive".into());
    }
    if config.agent.model.is_empty() {
        errors.push("agent.model must not be empty".into());
    }
    if config.agent.connect_timeout_secs == 0 {
        errors.push("agent.connect_timeout_secs must be positive".into());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}

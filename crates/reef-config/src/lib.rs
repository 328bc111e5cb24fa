//! Storyreef configuration system.
//!
//! TOML-based configuration with environment overrides for secrets.
//! Every section has defaults so a missing or partial config file
//! works out of the box.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{default_config_path, load_default, load_from_path, AGENT_API_KEY_ENV};
pub use schema::{AgentConfig, GameConfig, ReefConfig, ServerConfig};

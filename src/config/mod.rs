/// Database configuration and connection management
pub mod database;

/// Engine settings loading from config.toml
pub mod settings;

pub use settings::{Settings, load_config, load_default_config};

//! Configuration loading and hot-reload for the agent core.

mod manager;

pub use manager::{Config, ConfigError, ConfigManager, ModelCost};

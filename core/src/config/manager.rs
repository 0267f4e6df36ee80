//! Runtime configuration: `$AGENT_HOME/config.toml`, loaded once at startup
//! and hot-reloadable via [`ConfigManager::reload`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::rate_limiter::{RateLimitConfig, RateLimitError, RateLimiter};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Cost-per-million-tokens for a model, used only for operator-facing
/// reporting; the orchestration layer itself never makes routing decisions
/// on cost.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelCost {
    pub input_price_per_million: f64,
    pub output_price_per_million: f64,
}

/// One installed model, as the operator declares it in `config.toml`. Turned
/// into an `llm::ModelSpec` at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpecConfig {
    pub id: String,
    /// `"openai_compatible"` or `"gemini"`, parsed via `LlmProvider::from_str`.
    pub provider: String,
    pub base_url: String,
    pub api_key: Option<String>,
}

/// Top-level configuration, reloadable at runtime.
///
/// Fields fall into three groups: the Model Gateway's rate-limit and token
/// budgets (shared with `rate_limiter.rs`), the Executor's per-turn budgets,
/// and the Heartbeat's timing. All have defaults so a fresh `$AGENT_HOME`
/// boots without a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Largest context window offered to any tier.
    pub max_context_tokens: usize,
    /// Fraction of `max_context_tokens` at which history compression kicks
    /// in (the Executor additionally applies its own fixed ~5500-token
    /// threshold independent of this knob).
    pub condense_threshold: f32,
    /// Default max output tokens per model reply absent a tier override.
    pub max_output_tokens: usize,
    /// Maximum number of background/worker turns permitted concurrently
    /// (the heartbeat only ever runs one, but skills such as `delegate`
    /// may spawn sub-workers bounded by this limit).
    pub worker_limit: usize,

    /// Rate limiting (bridged into a `rate_limiter::RateLimiter`).
    pub rate_limit_tokens_per_minute: u32,
    pub rate_limit_requests_per_minute: u32,

    /// Per-model cost table, keyed by model id, for operator reporting.
    pub model_costs: HashMap<String, ModelCost>,

    /// Heartbeat tick period in seconds (default: 300s / 5 minutes).
    pub heartbeat_tick_secs: u64,
    /// Delay before the heartbeat's first tick (default: 15s).
    pub heartbeat_startup_delay_secs: u64,
    /// Grace period after `resume_after_user()` during which ticks still
    /// treat the scheduler as paused (default: 30s).
    pub heartbeat_pause_grace_secs: u64,
    /// Token budget for the heartbeat's background executor turns.
    pub heartbeat_token_budget: usize,
    /// Per-task execution timeout for the heartbeat, in seconds (default:
    /// 10 minutes).
    pub heartbeat_task_timeout_secs: u64,

    /// Executor tool-call budget per turn (default: 20).
    pub executor_max_tool_calls: u32,
    /// Executor nudge budget before a forced FINAL (default: 3).
    pub executor_max_nudges: u32,
    /// Validation-retry budget for a user-initiated turn (default: 8).
    pub executor_max_retries_user: u32,
    /// Validation-retry budget for a background turn (default: 1).
    pub executor_max_retries_background: u32,
    /// Estimated-token threshold above which message history is compressed
    /// (default: 5500, at ~1 token per 4 characters).
    pub executor_history_compress_threshold: usize,
    /// Cap, in bytes, on a skill result string before truncation (default:
    /// ~6 KB).
    pub skill_result_cap_bytes: usize,

    /// Default `max_retries` for newly-added tasks absent an override.
    pub task_default_max_retries: u32,

    /// The models this deployment can reach. The Router picks among
    /// `router_small_model`/`router_medium_model`/`router_large_model`,
    /// which must each name an entry here (or be silently unreachable).
    pub models: Vec<ModelSpecConfig>,
    pub router_small_model: String,
    pub router_medium_model: String,
    pub router_large_model: String,
    /// Fallback preference order, most to least preferred, before filtering
    /// to what `models` actually declares.
    pub router_fallback_preference: Vec<String>,
    /// Model used for the Pre-Pipeline's fused classify/rewrite/extract call
    /// and for the embedding calls behind semantic memory.
    pub pipeline_model: String,
    pub embed_model: String,
    /// Optional endpoint for the `web_search` built-in skill; unset disables
    /// the skill rather than silently fabricating results.
    pub web_search_endpoint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let mut model_costs = HashMap::new();
        model_costs.insert(
            "gemini-2.0-flash".to_string(),
            ModelCost {
                input_price_per_million: 0.075,
                output_price_per_million: 0.30,
            },
        );
        model_costs.insert(
            "gemini-1.5-pro".to_string(),
            ModelCost {
                input_price_per_million: 1.25,
                output_price_per_million: 5.00,
            },
        );

        Self {
            max_context_tokens: 128_000,
            condense_threshold: 0.8,
            max_output_tokens: 4096,
            worker_limit: 5,
            rate_limit_tokens_per_minute: 100_000,
            rate_limit_requests_per_minute: 100,
            model_costs,
            heartbeat_tick_secs: 300,
            heartbeat_startup_delay_secs: 15,
            heartbeat_pause_grace_secs: 30,
            heartbeat_token_budget: 1500,
            heartbeat_task_timeout_secs: 600,
            executor_max_tool_calls: 20,
            executor_max_nudges: 3,
            executor_max_retries_user: 8,
            executor_max_retries_background: 1,
            executor_history_compress_threshold: 5500,
            skill_result_cap_bytes: 6 * 1024,
            task_default_max_retries: 2,
            models: vec![
                ModelSpecConfig {
                    id: "small".to_string(),
                    provider: "openai_compatible".to_string(),
                    base_url: "http://localhost:11434/v1".to_string(),
                    api_key: None,
                },
                ModelSpecConfig {
                    id: "medium".to_string(),
                    provider: "openai_compatible".to_string(),
                    base_url: "http://localhost:11434/v1".to_string(),
                    api_key: None,
                },
                ModelSpecConfig {
                    id: "large".to_string(),
                    provider: "openai_compatible".to_string(),
                    base_url: "http://localhost:11434/v1".to_string(),
                    api_key: None,
                },
            ],
            router_small_model: "small".to_string(),
            router_medium_model: "medium".to_string(),
            router_large_model: "large".to_string(),
            router_fallback_preference: vec![
                "large".to_string(),
                "medium".to_string(),
                "small".to_string(),
            ],
            pipeline_model: "small".to_string(),
            embed_model: "small".to_string(),
            web_search_endpoint: None,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_context_tokens == 0 {
            return Err(ConfigError::InvalidValue(
                "max_context_tokens must be > 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.condense_threshold) {
            return Err(ConfigError::InvalidValue(
                "condense_threshold must be in [0, 1]".to_string(),
            ));
        }
        if self.executor_max_tool_calls == 0 {
            return Err(ConfigError::InvalidValue(
                "executor_max_tool_calls must be > 0".to_string(),
            ));
        }
        if self.heartbeat_tick_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "heartbeat_tick_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Owns the live `Config`, the path it was loaded from, and the rate
/// limiter derived from it. Shared across the HTTP server, Heartbeat, and
/// Model Gateway as an `Arc<ConfigManager>`.
pub struct ConfigManager {
    config: RwLock<Config>,
    config_path: PathBuf,
    rate_limiter: RwLock<RateLimiter>,
    last_modified: RwLock<Option<std::time::SystemTime>>,
}

impl ConfigManager {
    /// Create a new ConfigManager, loading from `$AGENT_HOME/config.toml`
    /// (falling back to `~/.hearth/config.toml` when `AGENT_HOME` is unset).
    /// Creates a default config file if none exists yet.
    pub async fn new() -> Result<Arc<Self>, ConfigError> {
        let config_path = Self::default_config_path()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let (config, last_modified) = if config_path.exists() {
            let content = fs::read_to_string(&config_path).await?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            let metadata = fs::metadata(&config_path).await?;
            (config, metadata.modified().ok())
        } else {
            let config = Config::default();
            config.validate()?;
            let toml_string = toml::to_string_pretty(&config)?;
            fs::write(&config_path, toml_string).await?;
            let metadata = fs::metadata(&config_path).await?;
            tracing::info!(path = %config_path.display(), "created default config");
            (config, metadata.modified().ok())
        };

        let rate_limiter = RateLimiter::new(RateLimitConfig::from_settings(
            Some(config.rate_limit_requests_per_minute),
            None,
        ));

        Ok(Arc::new(Self {
            config: RwLock::new(config),
            config_path,
            rate_limiter: RwLock::new(rate_limiter),
            last_modified: RwLock::new(last_modified),
        }))
    }

    /// Resolve `$AGENT_HOME/config.toml`, defaulting to `~/.hearth`.
    fn default_config_path() -> Result<PathBuf, ConfigError> {
        let home_dir = Self::agent_home()?;
        Ok(home_dir.join("config.toml"))
    }

    /// Resolve `$AGENT_HOME`, defaulting to `~/.hearth`.
    pub fn agent_home() -> Result<PathBuf, ConfigError> {
        if let Ok(dir) = std::env::var("AGENT_HOME") {
            return Ok(PathBuf::from(dir));
        }
        let home_dir = dirs::home_dir().ok_or_else(|| {
            ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not determine home directory; set AGENT_HOME",
            ))
        })?;
        Ok(home_dir.join(".hearth"))
    }

    /// Resolve the Task Store's database path: `$AGENT_DB`, else
    /// `$AGENT_HOME/hearth.db`.
    pub fn db_path() -> Result<PathBuf, ConfigError> {
        if let Ok(path) = std::env::var("AGENT_DB") {
            return Ok(PathBuf::from(path));
        }
        Ok(Self::agent_home()?.join("hearth.db"))
    }

    /// Resolve the skill-writer/skill-generated-file workspace directory:
    /// `$AGENT_WORKSPACE`, else `$AGENT_HOME/workspace`.
    pub fn workspace_dir() -> Result<PathBuf, ConfigError> {
        if let Ok(path) = std::env::var("AGENT_WORKSPACE") {
            return Ok(PathBuf::from(path));
        }
        Ok(Self::agent_home()?.join("workspace"))
    }

    /// Resolve the screenshots directory: `$AGENT_SCREENSHOTS`, else
    /// `$AGENT_HOME/screenshots`.
    pub fn screenshots_dir() -> Result<PathBuf, ConfigError> {
        if let Ok(path) = std::env::var("AGENT_SCREENSHOTS") {
            return Ok(PathBuf::from(path));
        }
        Ok(Self::agent_home()?.join("screenshots"))
    }

    pub async fn get_config(&self) -> Config {
        self.config.read().await.clone()
    }

    /// Best-effort synchronous read; returns `None` if the lock is
    /// currently held for writing. Prefer `get_config()` in async contexts.
    pub fn get_config_blocking(&self) -> Option<Config> {
        self.config.try_read().ok().map(|guard| guard.clone())
    }

    /// Re-read configuration from disk, replacing the live config and
    /// rebuilding the rate limiter from the new limits.
    pub async fn reload(&self) -> Result<(), ConfigError> {
        if !self.config_path.exists() {
            return Err(ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("config file not found: {:?}", self.config_path),
            )));
        }

        let content = fs::read_to_string(&self.config_path).await?;
        let new_config: Config = toml::from_str(&content)?;
        new_config.validate()?;

        let mut rate_limiter = self.rate_limiter.write().await;
        *rate_limiter = RateLimiter::new(RateLimitConfig::from_settings(
            Some(new_config.rate_limit_requests_per_minute),
            None,
        ));

        let mut config = self.config.write().await;
        *config = new_config;

        let metadata = fs::metadata(&self.config_path).await?;
        *self.last_modified.write().await = metadata.modified().ok();

        tracing::info!(path = %self.config_path.display(), "config reloaded");
        Ok(())
    }

    /// Acquire permission for a Model Gateway call; `is_worker` distinguishes
    /// the heartbeat's background calls from user-turn calls so each draws
    /// from its own quota.
    pub async fn check_rate_limit(
        &self,
        is_worker: bool,
        estimated_tokens: u32,
    ) -> Result<(), RateLimitError> {
        let limiter = self.rate_limiter.read().await;
        limiter.acquire("default", is_worker, estimated_tokens).await
    }

    pub async fn get_worker_limit(&self) -> usize {
        self.config.read().await.worker_limit
    }

    pub async fn get_model_cost(&self, model_id: &str) -> Option<ModelCost> {
        self.config.read().await.model_costs.get(model_id).copied()
    }

    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Spawn a background task that polls the config file's mtime and
    /// calls `reload()` when it changes. The returned handle is owned by
    /// the caller (typically dropped at shutdown alongside the other
    /// long-running tasks).
    pub fn start_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));
            loop {
                interval.tick().await;
                let current = match fs::metadata(&this.config_path).await {
                    Ok(meta) => meta.modified().ok(),
                    Err(_) => continue,
                };
                let last = *this.last_modified.read().await;
                if current.is_some() && current != last {
                    if let Err(err) = this.reload().await {
                        tracing::warn!(error = %err, "config hot-reload failed");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_condense_threshold() {
        let mut config = Config::default();
        config.condense_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_tool_call_budget() {
        let mut config = Config::default();
        config.executor_max_tool_calls = 0;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn new_creates_default_config_file() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("AGENT_HOME", dir.path());
        let manager = ConfigManager::new().await.unwrap();
        assert!(manager.config_path().exists());
        let config = manager.get_config().await;
        assert_eq!(config.heartbeat_tick_secs, 300);
        std::env::remove_var("AGENT_HOME");
    }

    #[tokio::test]
    async fn reload_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("AGENT_HOME", dir.path());
        let manager = ConfigManager::new().await.unwrap();

        let mut config = manager.get_config().await;
        config.heartbeat_tick_secs = 60;
        let toml_string = toml::to_string_pretty(&config).unwrap();
        fs::write(manager.config_path(), toml_string).await.unwrap();

        manager.reload().await.unwrap();
        assert_eq!(manager.get_config().await.heartbeat_tick_secs, 60);
        std::env::remove_var("AGENT_HOME");
    }
}

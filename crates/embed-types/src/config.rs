//! Configuration loading for embed-gateway.
//!
//! Layered config: defaults -> config file -> env vars.
//! Config file lives at ~/.config/embed-gateway/config.toml; every field
//! can also be set through `EMBED_GATEWAY_*` environment variables.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading/validation error.
#[derive(Debug, Error)]
#[error("Configuration error: {0}")]
pub struct ConfigError(pub String);

/// Remote embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Provider name ("openai" or "voyage")
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Embedding model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// Expected embedding dimension
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Base URL override (None = the provider's public endpoint)
    #[serde(default)]
    pub base_url: Option<String>,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Estimated cost per 1k input tokens (USD), for telemetry only
    #[serde(default = "default_cost_per_1k_tokens")]
    pub cost_per_1k_tokens: f64,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_dimension() -> usize {
    1536
}

fn default_api_key_env() -> String {
    "EMBED_GATEWAY_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_cost_per_1k_tokens() -> f64 {
    0.00002
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            dimension: default_dimension(),
            base_url: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            cost_per_1k_tokens: default_cost_per_1k_tokens(),
        }
    }
}

impl ProviderSettings {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        match self.provider.as_str() {
            "openai" | "voyage" => {}
            other => return Err(format!("unknown provider '{}'", other)),
        }
        if self.dimension == 0 {
            return Err("dimension must be > 0".to_string());
        }
        if self.timeout_secs == 0 {
            return Err("timeout_secs must be > 0".to_string());
        }
        Ok(())
    }
}

/// Embedding cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Path to the RocksDB cache directory
    #[serde(default = "default_cache_path")]
    pub path: String,

    /// Entry time-to-live in seconds (entries older are eligible for eviction)
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    /// Maximum number of cached entries
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,

    /// Fraction of writes that trigger a maintenance pass (0.0 disables)
    #[serde(default = "default_maintenance_probability")]
    pub maintenance_probability: f64,
}

fn default_cache_path() -> String {
    ProjectDirs::from("", "", "embed-gateway")
        .map(|p| p.data_local_dir().join("embedding-cache"))
        .unwrap_or_else(|| PathBuf::from("./embedding-cache"))
        .to_string_lossy()
        .to_string()
}

fn default_cache_ttl_secs() -> u64 {
    30 * 24 * 60 * 60
}

fn default_cache_max_entries() -> usize {
    500_000
}

fn default_maintenance_probability() -> f64 {
    0.01
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            ttl_secs: default_cache_ttl_secs(),
            max_entries: default_cache_max_entries(),
            maintenance_probability: default_maintenance_probability(),
        }
    }
}

impl CacheSettings {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.maintenance_probability) {
            return Err(format!(
                "maintenance_probability must be 0.0-1.0, got {}",
                self.maintenance_probability
            ));
        }
        if self.max_entries == 0 {
            return Err("max_entries must be > 0".to_string());
        }
        Ok(())
    }
}

/// Circuit breaker settings (shared by all named circuits).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitSettings {
    /// Consecutive failures before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Cool-down before a half-open probe is allowed (seconds)
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Cool-down multiplier applied per consecutive failed probe
    #[serde(default = "default_cooldown_multiplier")]
    pub cooldown_multiplier: f64,

    /// Upper bound on the cool-down window (seconds)
    #[serde(default = "default_max_cooldown_secs")]
    pub max_cooldown_secs: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_secs() -> u64 {
    30
}

fn default_cooldown_multiplier() -> f64 {
    2.0
}

fn default_max_cooldown_secs() -> u64 {
    300
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
            cooldown_multiplier: default_cooldown_multiplier(),
            max_cooldown_secs: default_max_cooldown_secs(),
        }
    }
}

impl CircuitSettings {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be > 0".to_string());
        }
        if self.cooldown_multiplier < 1.0 {
            return Err("cooldown_multiplier must be >= 1.0".to_string());
        }
        Ok(())
    }
}

/// Retry policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Maximum retries after the initial attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff interval (milliseconds)
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    /// Maximum backoff interval (milliseconds)
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_interval_ms() -> u64 {
    250
}

fn default_max_interval_ms() -> u64 {
    10_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
        }
    }
}

/// Batch splitting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSettings {
    /// Maximum items per provider sub-batch
    #[serde(default = "default_max_batch_items")]
    pub max_batch_items: usize,

    /// Token budget per provider sub-batch
    #[serde(default = "default_max_batch_tokens")]
    pub max_batch_tokens: usize,

    /// Retry failed sub-batches item-by-item
    #[serde(default = "default_item_fallback")]
    pub item_fallback: bool,

    /// Delay between item-by-item fallback requests (milliseconds)
    #[serde(default = "default_item_fallback_delay_ms")]
    pub item_fallback_delay_ms: u64,
}

fn default_max_batch_items() -> usize {
    64
}

fn default_max_batch_tokens() -> usize {
    8_000
}

fn default_item_fallback() -> bool {
    true
}

fn default_item_fallback_delay_ms() -> u64 {
    100
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_batch_items: default_max_batch_items(),
            max_batch_tokens: default_max_batch_tokens(),
            item_fallback: default_item_fallback(),
            item_fallback_delay_ms: default_item_fallback_delay_ms(),
        }
    }
}

impl BatchSettings {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_batch_items == 0 {
            return Err("max_batch_items must be > 0".to_string());
        }
        if self.max_batch_tokens == 0 {
            return Err("max_batch_tokens must be > 0".to_string());
        }
        Ok(())
    }
}

/// Sync/deferred dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Allow handing work to the deferred queue at all
    #[serde(default)]
    pub deferred_enabled: bool,

    /// Collections that must always run synchronously
    #[serde(default)]
    pub deferred_opt_out: Vec<String>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            deferred_enabled: false,
            deferred_opt_out: Vec::new(),
        }
    }
}

/// Recovery service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverySettings {
    /// Maximum recovery attempts per failure kind + context per rolling hour
    #[serde(default = "default_max_attempts_per_hour")]
    pub max_attempts_per_hour: usize,

    /// How long a health report stays cached (seconds)
    #[serde(default = "default_health_cache_secs")]
    pub health_cache_secs: u64,

    /// Interval between proactive health checks (seconds)
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
}

fn default_max_attempts_per_hour() -> usize {
    5
}

fn default_health_cache_secs() -> u64 {
    30
}

fn default_health_interval_secs() -> u64 {
    300
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            max_attempts_per_hour: default_max_attempts_per_hour(),
            health_cache_secs: default_health_cache_secs(),
            health_interval_secs: default_health_interval_secs(),
        }
    }
}

/// Main application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub provider: ProviderSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub circuit: CircuitSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub batch: BatchSettings,

    #[serde(default)]
    pub dispatch: DispatchSettings,

    #[serde(default)]
    pub recovery: RecoverySettings,
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/embed-gateway/config.toml)
    /// 3. Caller-specified config file (optional)
    /// 4. Environment variables (EMBED_GATEWAY_*)
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let config_dir = ProjectDirs::from("", "", "embed-gateway")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        let settings: Settings = builder
            .add_source(Environment::with_prefix("EMBED_GATEWAY").separator("__"))
            .build()
            .map_err(|e| ConfigError(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ConfigError(e.to_string()))?;

        settings.validate().map_err(ConfigError)?;
        Ok(settings)
    }

    /// Validate all sections.
    pub fn validate(&self) -> Result<(), String> {
        self.provider.validate()?;
        self.cache.validate()?;
        self.circuit.validate()?;
        self.batch.validate()?;
        Ok(())
    }
}

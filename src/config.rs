//! Configuration management for the Crossflow engine
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub engine: EngineConfig,
    pub coordinator: CoordinatorConfig,
    pub resolver: ResolverConfig,
    pub executor: ExecutorConfig,
    pub scheduler: SchedulerConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub providers: ProvidersConfig,
    pub wallet: WalletConfig,
    pub chains: HashMap<String, ChainConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub instance_id: String,
    pub health_check_interval_secs: u64,
}

/// Request coordinator tuning: cache TTLs per data class, the global
/// rate window, and the per-action throttle.
#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,
    #[serde(default = "default_near_limit_percent")]
    pub near_limit_percent: u32,
    #[serde(default = "default_pending_max_age_secs")]
    pub pending_max_age_secs: u64,
    #[serde(default = "default_action_min_interval_ms")]
    pub action_min_interval_ms: u64,
    #[serde(default = "default_price_ttl_secs")]
    pub price_ttl_secs: u64,
    #[serde(default = "default_quote_ttl_secs")]
    pub quote_ttl_secs: u64,
    #[serde(default = "default_token_list_ttl_secs")]
    pub token_list_ttl_secs: u64,
    #[serde(default = "default_balance_ttl_secs")]
    pub balance_ttl_secs: u64,
}

impl CoordinatorConfig {
    pub fn price_ttl(&self) -> Duration {
        Duration::from_secs(self.price_ttl_secs)
    }
    pub fn quote_ttl(&self) -> Duration {
        Duration::from_secs(self.quote_ttl_secs)
    }
    pub fn token_list_ttl(&self) -> Duration {
        Duration::from_secs(self.token_list_ttl_secs)
    }
    pub fn balance_ttl(&self) -> Duration {
        Duration::from_secs(self.balance_ttl_secs)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: default_rate_limit_per_minute(),
            near_limit_percent: default_near_limit_percent(),
            pending_max_age_secs: default_pending_max_age_secs(),
            action_min_interval_ms: default_action_min_interval_ms(),
            price_ttl_secs: default_price_ttl_secs(),
            quote_ttl_secs: default_quote_ttl_secs(),
            token_list_ttl_secs: default_token_list_ttl_secs(),
            balance_ttl_secs: default_balance_ttl_secs(),
        }
    }
}

/// Quote resolver debounce and retry policy.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_clear_debounce_ms")]
    pub clear_debounce_ms: u64,
    #[serde(default = "default_cross_chain_debounce_ms")]
    pub cross_chain_debounce_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            clear_debounce_ms: default_clear_debounce_ms(),
            cross_chain_debounce_ms: default_cross_chain_debounce_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

/// Execution state machine polling policy.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_approval_poll_interval_ms")]
    pub approval_poll_interval_ms: u64,
    #[serde(default = "default_approval_poll_attempts")]
    pub approval_poll_attempts: u32,
    /// When true, an approval whose confirmation cannot be observed within
    /// the attempt ceiling fails the flow instead of proceeding.
    #[serde(default)]
    pub fail_on_approval_timeout: bool,
    #[serde(default = "default_bridge_poll_interval_ms")]
    pub bridge_poll_interval_ms: u64,
    #[serde(default = "default_bridge_poll_attempts")]
    pub bridge_poll_attempts: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            approval_poll_interval_ms: default_approval_poll_interval_ms(),
            approval_poll_attempts: default_approval_poll_attempts(),
            fail_on_approval_timeout: false,
            bridge_poll_interval_ms: default_bridge_poll_interval_ms(),
            bridge_poll_attempts: default_bridge_poll_attempts(),
        }
    }
}

/// Order trigger evaluator schedule.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_trigger_interval_secs")]
    pub trigger_interval_secs: u64,
    #[serde(default = "default_trigger_window_hours")]
    pub trigger_window_hours: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            trigger_interval_secs: default_trigger_interval_secs(),
            trigger_window_hours: default_trigger_window_hours(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

/// Upstream aggregator endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    pub quote_api_url: String,
    pub bridge_api_url: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub private_key_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    pub native_symbol: String,
    pub enabled: bool,
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("CROSSFLOW_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        // At least one chain must be enabled
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        for (name, chain) in &self.chains {
            if chain.enabled && chain.rpc_urls.is_empty() {
                anyhow::bail!("Chain {} has no RPC URLs configured", name);
            }
        }

        if self.providers.quote_api_url.is_empty() {
            anyhow::bail!("Quote provider URL must be configured");
        }

        if self.coordinator.rate_limit_per_minute == 0 {
            anyhow::bail!("Rate limit ceiling must be positive");
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }

    /// Get chain config by chain ID
    pub fn get_chain_by_id(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.values().find(|c| c.chain_id == chain_id)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

fn default_rate_limit_per_minute() -> u32 {
    40
}
fn default_near_limit_percent() -> u32 {
    80
}
fn default_pending_max_age_secs() -> u64 {
    30
}
fn default_action_min_interval_ms() -> u64 {
    500
}
fn default_price_ttl_secs() -> u64 {
    30
}
fn default_quote_ttl_secs() -> u64 {
    20
}
fn default_token_list_ttl_secs() -> u64 {
    300
}
fn default_balance_ttl_secs() -> u64 {
    45
}
fn default_debounce_ms() -> u64 {
    600
}
fn default_clear_debounce_ms() -> u64 {
    100
}
fn default_cross_chain_debounce_ms() -> u64 {
    600
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}
fn default_approval_poll_interval_ms() -> u64 {
    2000
}
fn default_approval_poll_attempts() -> u32 {
    30
}
fn default_bridge_poll_interval_ms() -> u64 {
    10_000
}
fn default_bridge_poll_attempts() -> u32 {
    60
}
fn default_trigger_interval_secs() -> u64 {
    180
}
fn default_trigger_window_hours() -> i64 {
    24
}
fn default_http_timeout_secs() -> u64 {
    15
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(
            result,
            "url = \"https://api.example.com/test_value/endpoint\""
        );
    }

    #[test]
    fn coordinator_defaults_match_data_classes() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.price_ttl(), Duration::from_secs(30));
        assert_eq!(config.quote_ttl(), Duration::from_secs(20));
        assert_eq!(config.token_list_ttl(), Duration::from_secs(300));
        assert_eq!(config.balance_ttl(), Duration::from_secs(45));
        assert_eq!(config.rate_limit_per_minute, 40);
    }
}

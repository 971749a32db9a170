use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Rpc {
    #[serde(default = "default_rpc_http_url")]
    pub http_url: String,
    /// Requests per second allowed against the node.
    #[serde(default = "default_qps_limit")]
    pub qps_limit: u32,
}

fn default_rpc_http_url() -> String {
    "http://127.0.0.1:8545".to_string()
}

fn default_qps_limit() -> u32 {
    25
}

impl Default for Rpc {
    fn default() -> Self {
        Self {
            http_url: default_rpc_http_url(),
            qps_limit: default_qps_limit(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Explorer {
    #[serde(default = "default_explorer_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    /// Minimum gap between two ABI requests (free Etherscan keys allow ~5 calls/s).
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_explorer_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_explorer_base_url() -> String {
    "https://api.etherscan.io/api".to_string()
}

fn default_min_interval_ms() -> u64 {
    250
}

fn default_explorer_timeout_ms() -> u64 {
    10_000
}

impl Default for Explorer {
    fn default() -> Self {
        Self {
            base_url: default_explorer_base_url(),
            api_key: String::new(),
            min_interval_ms: default_min_interval_ms(),
            timeout_ms: default_explorer_timeout_ms(),
        }
    }
}

impl Explorer {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Aave {
    /// Aave V3 Pool proxy (Ethereum mainnet by default).
    #[serde(default = "default_pool_proxy")]
    pub pool_proxy: String,
    #[serde(default = "default_subgraph_url")]
    pub subgraph_url: String,
}

fn default_pool_proxy() -> String {
    "0x87870Bca3F3fD6335C3F4ce8392D69350B4fA4E2".to_string()
}

fn default_subgraph_url() -> String {
    "https://api.thegraph.com/subgraphs/name/aave/protocol-v3".to_string()
}

impl Default for Aave {
    fn default() -> Self {
        Self {
            pool_proxy: default_pool_proxy(),
            subgraph_url: default_subgraph_url(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Batch {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Per-element deadline; absent means wait indefinitely.
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,
}

fn default_max_concurrency() -> usize {
    32
}

impl Default for Batch {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            call_timeout_ms: None,
        }
    }
}

impl Batch {
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AbiCache {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AbiCache {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub rpc: Rpc,
    #[serde(default)]
    pub explorer: Explorer,
    #[serde(default)]
    pub aave: Aave,
    #[serde(default)]
    pub batch: Batch,
    #[serde(default)]
    pub abi_cache: AbiCache,
}

impl Settings {
    /// Loads `Config.toml` (optional) and applies `LENS_*` environment overrides.
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("Config.toml").required(false))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;
        apply_env_overrides(&mut settings);
        Ok(settings)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

fn apply_env_overrides(settings: &mut Settings) {
    if let Some(url) = non_empty_env("LENS_RPC_HTTP_URL") {
        settings.rpc.http_url = url;
    }
    if let Some(key) = non_empty_env("LENS_EXPLORER_API_KEY") {
        settings.explorer.api_key = key;
    }
    if let Some(url) = non_empty_env("LENS_EXPLORER_BASE_URL") {
        settings.explorer.base_url = url;
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let settings = Settings::from_toml_str("").unwrap();
        assert_eq!(settings.explorer.min_interval(), Duration::from_millis(250));
        assert_eq!(settings.batch.max_concurrency, 32);
        assert_eq!(settings.batch.call_timeout(), None);
        assert!(settings.abi_cache.enabled);
        assert_eq!(
            settings.aave.pool_proxy,
            "0x87870Bca3F3fD6335C3F4ce8392D69350B4fA4E2"
        );
    }

    #[test]
    fn sections_override_defaults() {
        let settings = Settings::from_toml_str(
            r#"
            [explorer]
            api_key = "ABC"
            min_interval_ms = 300

            [batch]
            max_concurrency = 4
            call_timeout_ms = 1500
            "#,
        )
        .unwrap();
        assert_eq!(settings.explorer.api_key, "ABC");
        assert_eq!(settings.explorer.min_interval(), Duration::from_millis(300));
        assert_eq!(settings.batch.max_concurrency, 4);
        assert_eq!(settings.batch.call_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(settings.rpc.qps_limit, 25);
    }
}

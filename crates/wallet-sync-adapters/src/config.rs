use std::time::Duration;

use wallet_sync_core::{ConfigError, SyncOptions, DEFAULT_BALANCE_UPDATE_INTERVAL};

pub const ENV_PROVIDER_URLS: &str = "WALLET_SYNC_PROVIDER_URLS";
pub const ENV_POLLING_INTERVAL_MS: &str = "WALLET_SYNC_POLLING_INTERVAL_MS";
pub const ENV_BALANCE_UPDATE_INTERVAL: &str = "WALLET_SYNC_BALANCE_UPDATE_INTERVAL";
pub const ENV_EIP1193_PROXY_URL: &str = "WALLET_SYNC_EIP1193_PROXY_URL";
pub const ENV_RPC_TIMEOUT_MS: &str = "WALLET_SYNC_RPC_TIMEOUT_MS";
pub const ENV_TICK_MS: &str = "WALLET_SYNC_TICK_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub provider_urls: Vec<String>,
    pub polling_interval_ms: u64,
    pub balance_update_interval: u64,
    /// JSON-RPC endpoint relaying EIP-1193 requests to a real wallet.
    /// `None` selects the in-memory wallet.
    pub eip1193_proxy_url: Option<String>,
    pub rpc_timeout_ms: u64,
    pub tick_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            provider_urls: Vec::new(),
            polling_interval_ms: 4_000,
            balance_update_interval: DEFAULT_BALANCE_UPDATE_INTERVAL,
            eip1193_proxy_url: None,
            rpc_timeout_ms: 15_000,
            tick_ms: 250,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Unset or blank keys
    /// keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut cfg = Self::default();

        if let Some(raw) = get(ENV_PROVIDER_URLS) {
            cfg.provider_urls = raw
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_owned)
                .collect();
        }
        if let Some(raw) = get(ENV_POLLING_INTERVAL_MS) {
            cfg.polling_interval_ms = parse_positive(ENV_POLLING_INTERVAL_MS, &raw)?;
        }
        if let Some(raw) = get(ENV_BALANCE_UPDATE_INTERVAL) {
            cfg.balance_update_interval = parse_u64(ENV_BALANCE_UPDATE_INTERVAL, &raw)?;
        }
        cfg.eip1193_proxy_url = get(ENV_EIP1193_PROXY_URL).map(|v| v.trim().to_owned());
        if let Some(raw) = get(ENV_RPC_TIMEOUT_MS) {
            cfg.rpc_timeout_ms = parse_positive(ENV_RPC_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = get(ENV_TICK_MS) {
            cfg.tick_ms = parse_positive(ENV_TICK_MS, &raw)?;
        }
        Ok(cfg)
    }

    pub fn to_options(&self) -> SyncOptions {
        SyncOptions {
            provider_urls: self.provider_urls.clone(),
            polling_interval_ms: self.polling_interval_ms,
            balance_update_interval: self.balance_update_interval,
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

fn parse_u64(key: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_owned(),
        value: raw.to_owned(),
    })
}

fn parse_positive(key: &str, raw: &str) -> Result<u64, ConfigError> {
    match parse_u64(key, raw)? {
        0 => Err(ConfigError::InvalidValue {
            key: key.to_owned(),
            value: raw.to_owned(),
        }),
        n => Ok(n),
    }
}

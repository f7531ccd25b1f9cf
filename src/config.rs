use anyhow::Context;
use dotenvy::dotenv;
use std::env;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub anomaly_webhook_secret: String,
    pub anchor_timeout: Duration,
    pub chain: Option<ChainConfig>,
}

/// Present only when `CHAIN_RPC_URL` is set.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub rpc_url: Url,
    pub signing_key: String,
    pub logger_address: String,
    pub fund_manager_address: Option<String>,
    pub gas_limit: u64,
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let chain = match lookup("CHAIN_RPC_URL") {
            Some(rpc_url) => Some(ChainConfig {
                rpc_url: Url::parse(&rpc_url).context("CHAIN_RPC_URL is not a valid URL")?,
                signing_key: required(&lookup, "CHAIN_SIGNING_KEY")?,
                logger_address: required(&lookup, "CHAIN_LOGGER_ADDRESS")?,
                fund_manager_address: lookup("CHAIN_FUND_MANAGER_ADDRESS")
                    .filter(|address| !address.trim().is_empty()),
                gas_limit: parsed(&lookup, "CHAIN_GAS_LIMIT", 3_000_000)?,
                failure_threshold: parsed(&lookup, "CHAIN_FAILURE_THRESHOLD", 3)?,
                reset_timeout_secs: parsed(&lookup, "CHAIN_RESET_TIMEOUT_SECS", 60)?,
            }),
            None => None,
        };

        Ok(Config {
            server_port: parsed(&lookup, "SERVER_PORT", 3000)?,
            database_url: required(&lookup, "DATABASE_URL")?,
            database_max_connections: parsed(&lookup, "DATABASE_MAX_CONNECTIONS", 5)?,
            anomaly_webhook_secret: required(&lookup, "ANOMALY_WEBHOOK_SECRET")?,
            anchor_timeout: Duration::from_secs(parsed(&lookup, "ANCHOR_TIMEOUT_SECS", 5)?),
            chain,
        })
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<String> {
    lookup(key).with_context(|| format!("{} must be set", key))
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", key, raw)),
        None => Ok(default),
    }
}

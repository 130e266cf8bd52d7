use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Application configuration loaded from environment variables
#[derive(Clone)]
pub struct Config {
    pub rpc_url: String,
    pub private_key: String,
    pub contract_address: String,
    pub abi_path: Option<PathBuf>,
    pub probe_timeout: Duration,
    pub request_timeout: Duration,
    pub confirmation_timeout: Duration,
    pub receipt_poll_interval: Duration,
    pub fallback_gas_limit: u64,
    pub gas_price_gwei: Option<u64>,
    pub poll_interval: Duration,
    pub event_lookback_blocks: u64,
}

impl Config {
    /// Configuration for the three required settings, all others defaulted.
    pub fn new(
        rpc_url: impl Into<String>,
        private_key: impl Into<String>,
        contract_address: impl Into<String>,
    ) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            private_key: private_key.into(),
            contract_address: contract_address.into(),
            abi_path: None,
            probe_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            confirmation_timeout: Duration::from_secs(120),
            receipt_poll_interval: Duration::from_millis(1000),
            fallback_gas_limit: 300_000,
            gas_price_gwei: None,
            poll_interval: Duration::from_secs(30),
            event_lookback_blocks: 1000,
        }
    }

    /// Load configuration from environment variables
    ///
    /// # Environment Variables
    /// - `RPC_URL`: Required - JSON-RPC endpoint URL
    /// - `PRIVATE_KEY`: Required - Hex-encoded secp256k1 signing key
    /// - `CONTRACT_ADDRESS`: Required - Deployed tracker contract address
    /// - `CONTRACT_ABI_PATH`: Optional - ABI or Hardhat artifact JSON (default: bundled ABI)
    /// - `PROBE_TIMEOUT_SECS`: Optional - Liveness probe timeout (default: 10)
    /// - `REQUEST_TIMEOUT_SECS`: Optional - Per-request HTTP timeout (default: 30)
    /// - `CONFIRMATION_TIMEOUT_SECS`: Optional - Receipt wait timeout (default: 120)
    /// - `RECEIPT_POLL_MILLIS`: Optional - Receipt poll interval (default: 1000)
    /// - `FALLBACK_GAS_LIMIT`: Optional - Gas used when estimation fails (default: 300000)
    /// - `GAS_PRICE_GWEI`: Optional - Fixed gas price (default: ask the node)
    /// - `POLL_INTERVAL_SECS`: Optional - Event poller interval (default: 30)
    /// - `EVENT_LOOKBACK_BLOCKS`: Optional - Blocks scanned for recent events (default: 1000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).unwrap_or_default();

        let mut config = Config::new(
            read("RPC_URL"),
            read("PRIVATE_KEY"),
            read("CONTRACT_ADDRESS"),
        );
        config.validate()?;

        config.abi_path = lookup("CONTRACT_ABI_PATH")
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        if let Some(secs) = parse_optional::<u64, _>(&lookup, "PROBE_TIMEOUT_SECS")? {
            config.probe_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_optional::<u64, _>(&lookup, "REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_optional::<u64, _>(&lookup, "CONFIRMATION_TIMEOUT_SECS")? {
            config.confirmation_timeout = Duration::from_secs(secs);
        }
        if let Some(millis) = parse_optional::<u64, _>(&lookup, "RECEIPT_POLL_MILLIS")? {
            config.receipt_poll_interval = Duration::from_millis(millis);
        }
        if let Some(gas) = parse_optional::<u64, _>(&lookup, "FALLBACK_GAS_LIMIT")? {
            config.fallback_gas_limit = gas;
        }
        config.gas_price_gwei = parse_optional::<u64, _>(&lookup, "GAS_PRICE_GWEI")?;
        if let Some(secs) = parse_optional::<u64, _>(&lookup, "POLL_INTERVAL_SECS")? {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(blocks) = parse_optional::<u64, _>(&lookup, "EVENT_LOOKBACK_BLOCKS")? {
            config.event_lookback_blocks = blocks;
        }

        Ok(config)
    }

    /// Checks the required settings in order, one distinct error per field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if is_unset(&self.rpc_url) {
            return Err(ConfigError::MissingEndpoint);
        }
        if is_unset(&self.private_key) {
            return Err(ConfigError::MissingKey);
        }
        if is_unset(&self.contract_address) {
            return Err(ConfigError::MissingContractAddress);
        }
        Ok(())
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("rpc_url", &self.rpc_url)
            .field("private_key", &"<redacted>")
            .field("contract_address", &self.contract_address)
            .field("abi_path", &self.abi_path)
            .field("probe_timeout", &self.probe_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("confirmation_timeout", &self.confirmation_timeout)
            .field("receipt_poll_interval", &self.receipt_poll_interval)
            .field("fallback_gas_limit", &self.fallback_gas_limit)
            .field("gas_price_gwei", &self.gas_price_gwei)
            .field("poll_interval", &self.poll_interval)
            .field("event_lookback_blocks", &self.event_lookback_blocks)
            .finish()
    }
}

// Blank values and the `your_..._here` template placeholders count as unset.
fn is_unset(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value.to_ascii_lowercase().starts_with("your_")
}

fn parse_optional<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        _ => Ok(None),
    }
}

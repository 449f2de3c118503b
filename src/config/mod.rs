use alloy::primitives::Address;
use eyre::{eyre, Result, WrapErr};
use log::LevelFilter;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::discovery::ExplorerEndpoint;
use crate::models::chain::Chain;
use crate::utils::address::parse_address;
use crate::utils::constants::{
    popular_tokens, DEFAULT_AUTODETECT_INTERVAL_SECS, DEFAULT_BALANCE_REFRESH_SECS,
    DEFAULT_BLOCK_POLL_SECS, DEFAULT_DOMAIN_TTL_SECS, DEFAULT_EXPLORER_PAGE_SIZE,
};
use crate::utils::logger::parse_level;

/// Configuration struct for the application
#[derive(Debug, Clone)]
pub struct Config {
    pub chains: Vec<Chain>,
    /// Per-chain RPC overrides, the chain catalogue supplies the rest
    pub rpc_overrides: HashMap<Chain, String>,
    pub explorer_api_keys: HashMap<Chain, String>,
    pub etherscan_api_key: Option<String>,
    pub unstoppable_api_key: Option<String>,
    pub domain_cache_dir: Option<PathBuf>,
    pub domain_cache_ttl: Duration,
    pub autodetect_interval: Duration,
    pub balance_refresh_interval: Duration,
    pub block_poll_interval: Duration,
    pub explorer_page_size: u32,
    pub hide_zero_balance: bool,
    pub extra_popular_tokens: HashMap<Chain, Vec<Address>>,
    pub log_level: LevelFilter,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chains: vec![Chain::MAINNET],
            rpc_overrides: HashMap::new(),
            explorer_api_keys: HashMap::new(),
            etherscan_api_key: None,
            unstoppable_api_key: None,
            domain_cache_dir: None,
            domain_cache_ttl: Duration::from_secs(DEFAULT_DOMAIN_TTL_SECS),
            autodetect_interval: Duration::from_secs(DEFAULT_AUTODETECT_INTERVAL_SECS),
            balance_refresh_interval: Duration::from_secs(DEFAULT_BALANCE_REFRESH_SECS),
            block_poll_interval: Duration::from_secs(DEFAULT_BLOCK_POLL_SECS),
            explorer_page_size: DEFAULT_EXPLORER_PAGE_SIZE,
            hide_zero_balance: false,
            extra_popular_tokens: HashMap::new(),
            log_level: LevelFilter::Info,
        }
    }
}

fn parse_secs(name: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .wrap_err_with(|| format!("{name} must be a number of seconds, got {value:?}"))
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_chains(value: &str) -> Result<Vec<Chain>> {
    let mut chains = Vec::new();
    for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let chain = part
            .parse::<Chain>()
            .wrap_err_with(|| format!("invalid chain id {part:?} in ENABLED_CHAINS"))?;
        if !chains.contains(&chain) {
            chains.push(chain);
        }
    }
    if chains.is_empty() {
        return Err(eyre!("ENABLED_CHAINS lists no chain"));
    }
    Ok(chains)
}

fn parse_addresses(name: &str, value: &str) -> Result<Vec<Address>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| parse_address(part).ok_or_else(|| eyre!("{name}: invalid address {part:?}")))
        .collect()
}

impl Config {
    /// Load configuration from environment variables, after reading `.env` if present.
    ///
    /// # Environment Variables:
    /// - `ENABLED_CHAINS`: comma separated chain ids
    /// - `RPC_URL_<id>`: RPC endpoint for a chain
    /// - `EXPLORER_API_KEY_<id>` / `ETHERSCAN_API_KEY`: explorer API keys
    /// - `UNSTOPPABLE_API_KEY`: Unstoppable Domains bearer key
    /// - `DOMAIN_CACHE_DIR`, `DOMAIN_CACHE_TTL_SECS`: domain record cache
    /// - `AUTODETECT_INTERVAL_SECS`, `BALANCE_REFRESH_SECS`, `BLOCK_POLL_SECS`: timings
    /// - `EXPLORER_PAGE_SIZE`, `HIDE_ZERO_BALANCE_TOKENS`, `POPULAR_TOKENS_<id>`
    /// - `LOG_LEVEL`
    ///
    /// # Errors
    /// * If a variable is set to a value that cannot be parsed
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`Config::from_env`] with an explicit variable source.
    ///
    /// # Errors
    /// * If a variable is set to a value that cannot be parsed
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let secs = |name: &str, default: Duration| -> Result<Duration> {
            get(name).map_or(Ok(default), |value| parse_secs(name, &value))
        };

        let chains = get("ENABLED_CHAINS").map_or(Ok(defaults.chains), |v| parse_chains(&v))?;

        // Per-chain variables are looked up for every enabled chain, plus mainnet for ENS
        let mut per_chain: Vec<Chain> = chains.clone();
        if !per_chain.contains(&Chain::MAINNET) {
            per_chain.push(Chain::MAINNET);
        }

        let mut rpc_overrides = HashMap::new();
        let mut explorer_api_keys = HashMap::new();
        let mut extra_popular_tokens = HashMap::new();
        for chain in &per_chain {
            if let Some(url) = get(&format!("RPC_URL_{chain}")) {
                rpc_overrides.insert(*chain, url.trim().to_string());
            }
            if let Some(key) = get(&format!("EXPLORER_API_KEY_{chain}")) {
                explorer_api_keys.insert(*chain, key.trim().to_string());
            }
            let name = format!("POPULAR_TOKENS_{chain}");
            if let Some(list) = get(&name) {
                extra_popular_tokens.insert(*chain, parse_addresses(&name, &list)?);
            }
        }

        let explorer_page_size = get("EXPLORER_PAGE_SIZE").map_or(
            Ok(defaults.explorer_page_size),
            |value| {
                value
                    .trim()
                    .parse::<u32>()
                    .wrap_err_with(|| format!("EXPLORER_PAGE_SIZE must be a number, got {value:?}"))
            },
        )?;

        Ok(Self {
            chains,
            rpc_overrides,
            explorer_api_keys,
            etherscan_api_key: get("ETHERSCAN_API_KEY"),
            unstoppable_api_key: get("UNSTOPPABLE_API_KEY"),
            domain_cache_dir: get("DOMAIN_CACHE_DIR").map(PathBuf::from),
            domain_cache_ttl: secs("DOMAIN_CACHE_TTL_SECS", defaults.domain_cache_ttl)?,
            autodetect_interval: secs("AUTODETECT_INTERVAL_SECS", defaults.autodetect_interval)?,
            balance_refresh_interval: secs(
                "BALANCE_REFRESH_SECS",
                defaults.balance_refresh_interval,
            )?,
            block_poll_interval: secs("BLOCK_POLL_SECS", defaults.block_poll_interval)?,
            explorer_page_size,
            hide_zero_balance: get("HIDE_ZERO_BALANCE_TOKENS").is_some_and(|v| parse_bool(&v)),
            extra_popular_tokens,
            log_level: get("LOG_LEVEL").map_or(defaults.log_level, |v| parse_level(&v)),
        })
    }

    /// RPC endpoint of every enabled chain and of mainnet (ENS lives there).
    ///
    /// # Errors
    /// * If an override is not a valid URL
    /// * If a chain has neither an override nor a catalogue default
    pub fn rpc_urls(&self) -> Result<HashMap<Chain, Url>> {
        let mut chains = self.chains.clone();
        if !chains.contains(&Chain::MAINNET) {
            chains.push(Chain::MAINNET);
        }

        chains
            .into_iter()
            .map(|chain| {
                let raw = self
                    .rpc_overrides
                    .get(&chain)
                    .map(String::as_str)
                    .or_else(|| chain.info().map(|info| info.default_rpc))
                    .ok_or_else(|| eyre!("no RPC endpoint for chain {chain}, set RPC_URL_{chain}"))?;
                let url = Url::parse(raw).wrap_err_with(|| format!("invalid RPC url for chain {chain}"))?;
                Ok((chain, url))
            })
            .collect()
    }

    /// Explorer APIs of enabled chains that have one. A chain-specific key wins over
    /// `ETHERSCAN_API_KEY`.
    pub fn explorer_endpoints(&self) -> HashMap<Chain, ExplorerEndpoint> {
        self.chains
            .iter()
            .filter_map(|chain| {
                let api = chain.info()?.explorer_api?;
                let api = match Url::parse(api) {
                    Ok(api) => api,
                    Err(e) => {
                        log::warn!("config: bad explorer url for chain {chain}: {e}");
                        return None;
                    }
                };
                let api_key = self
                    .explorer_api_keys
                    .get(chain)
                    .or(self.etherscan_api_key.as_ref())
                    .cloned();
                Some((*chain, ExplorerEndpoint { api, api_key }))
            })
            .collect()
    }

    /// Built-in owned-phase candidates plus `POPULAR_TOKENS_<id>` extras.
    pub fn popular_tokens(&self) -> HashMap<Chain, Vec<Address>> {
        self.chains
            .iter()
            .map(|chain| {
                let mut tokens = popular_tokens(chain.id());
                for extra in self.extra_popular_tokens.get(chain).into_iter().flatten() {
                    if !tokens.contains(extra) {
                        tokens.push(*extra);
                    }
                }
                (*chain, tokens)
            })
            .collect()
    }

    /// Create a test configuration
    #[cfg(test)]
    #[must_use]
    pub fn test_config() -> Self {
        Self::default()
    }
}
